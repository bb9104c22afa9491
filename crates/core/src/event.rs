//! Sprecher-Ereignisse
//!
//! Werden von der Empfangsseite erzeugt, wenn ein entfernter Sprecher
//! auftaucht, verschwindet oder seinen Sprechzustand wechselt.
//! Die Zustellung (Kanal, Callback) bestimmt der Aufrufer.

use crate::types::SessionId;
use serde::{Deserialize, Serialize};

/// Alle Ereignisse rund um einen entfernten Sprecher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SprecherEreignis {
    /// Erstes Paket einer neuen Session empfangen, Stream angelegt
    StreamAngelegt { session: SessionId },
    /// Stream wurde abgebaut (Disconnect oder Teardown)
    StreamEntfernt { session: SessionId },
    /// Der zuletzt ausgelieferte Block enthielt wieder Sprache
    Spricht { session: SessionId },
    /// Der zuletzt ausgelieferte Block war das Ende eines Sprechvorgangs
    SprichtNicht { session: SessionId },
}

impl SprecherEreignis {
    /// Session, auf die sich das Ereignis bezieht
    pub fn session(&self) -> SessionId {
        match self {
            Self::StreamAngelegt { session }
            | Self::StreamEntfernt { session }
            | Self::Spricht { session }
            | Self::SprichtNicht { session } => *session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = SprecherEreignis::Spricht {
            session: SessionId(3),
        };
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: SprecherEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, event);
    }

    #[test]
    fn session_aus_ereignis() {
        let e = SprecherEreignis::StreamEntfernt {
            session: SessionId(9),
        };
        assert_eq!(e.session(), SessionId(9));
    }
}
