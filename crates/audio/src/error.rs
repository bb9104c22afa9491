//! Fehlertypen fuer die Voice-Pipeline
//!
//! Im Hot Path (`request_samples`) werden keine Fehler an den Aufrufer
//! durchgereicht. Nur Konstruktionsfehler, Codec-Fehler und
//! Fehlbedienung des Packetizers erzeugen ein `Err`.

use thiserror::Error;

/// Alle moeglichen Fehler der Voice-Pipeline
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Packetizer voll: {gepuffert} von {kapazitaet} Frames belegt")]
    PufferVoll { gepuffert: usize, kapazitaet: usize },

    #[error("Packetizer nicht bereit: {gepuffert} von {kapazitaet} Frames belegt")]
    PufferLeer { gepuffert: usize, kapazitaet: usize },

    #[error("Stream wurde bereits zerstoert")]
    StreamZerstoert,

    #[error("Ereignis-Kanal geschlossen")]
    KanalGeschlossen,

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] sprechfunk_core::SprechfunkError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unerwarteter Fehler: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AudioError {
    /// true fuer Fehlbedienung des Packetizers (encode wenn voll, flush wenn nicht bereit)
    pub fn ist_kapazitaetsfehler(&self) -> bool {
        matches!(self, Self::PufferVoll { .. } | Self::PufferLeer { .. })
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kapazitaetsfehler_erkennung() {
        assert!(AudioError::PufferVoll {
            gepuffert: 2,
            kapazitaet: 2
        }
        .ist_kapazitaetsfehler());
        assert!(!AudioError::CodecFehler("x".into()).ist_kapazitaetsfehler());
    }

    #[test]
    fn protokollfehler_konvertierung() {
        let e: AudioError = sprechfunk_core::SprechfunkError::UnbekannterCodec(5).into();
        assert!(e.to_string().contains("Unbekannter Codec-Typ: 5"));
    }
}
