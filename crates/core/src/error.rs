//! Fehlertypen fuer Sprechfunk
//!
//! Gemeinsamer Fehler-Enum fuer Protokoll- und Konfigurationsfehler.
//! Untermodule (z.B. die Audio-Pipeline) definieren eigene Fehler und
//! konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Sprechfunk
pub type Result<T> = std::result::Result<T, SprechfunkError>;

/// Fehler die crate-uebergreifend auftreten koennen
#[derive(Debug, Error)]
pub enum SprechfunkError {
    // --- Protokoll ---
    #[error("Datenende erreicht: {benoetigt} Bytes benoetigt, {verfuegbar} verfuegbar")]
    DatenEnde { benoetigt: usize, verfuegbar: usize },

    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Unbekannter Codec-Typ: {0}")]
    UnbekannterCodec(u8),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SprechfunkError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler von fehlerhaften Eingangsdaten stammt
    ///
    /// Solche Fehler werden im Empfangspfad still verworfen.
    pub fn ist_eingabefehler(&self) -> bool {
        matches!(
            self,
            Self::DatenEnde { .. } | Self::UngueltigeNachricht(_) | Self::UnbekannterCodec(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = SprechfunkError::DatenEnde {
            benoetigt: 12,
            verfuegbar: 3,
        };
        assert_eq!(
            e.to_string(),
            "Datenende erreicht: 12 Bytes benoetigt, 3 verfuegbar"
        );
    }

    #[test]
    fn eingabefehler_erkennung() {
        assert!(SprechfunkError::UnbekannterCodec(7).ist_eingabefehler());
        assert!(SprechfunkError::UngueltigeNachricht("x".into()).ist_eingabefehler());
        assert!(!SprechfunkError::Konfiguration("x".into()).ist_eingabefehler());
        assert!(!SprechfunkError::intern("x").ist_eingabefehler());
    }
}
