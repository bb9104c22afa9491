//! Konfiguration der Empfangs- und Sendeseite
//!
//! Alle Felder haben Standardwerte, sodass die Pipeline ohne
//! Konfigurationsdatei lauffaehig ist. Geladen wird per serde (TOML).

use serde::{Deserialize, Serialize};
use sprechfunk_protocol::codec::{FRAME_SIZE, SAMPLE_RATE};

use crate::error::{AudioError, AudioResult};

/// Einstellungen eines Empfangs-Streams (pro Sprecher identisch)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmpfangsConfig {
    /// Samples pro Basis-Frame (ein Decode-Tick)
    pub frame_size: u32,
    /// Maximale Zusatz-Verzoegerung des Jitter Buffers in Basis-Frames
    pub jitter_margin_frames: u32,
    /// Maximale Anzahl gepufferter Pakete bevor das aelteste verworfen wird
    pub jitter_max_pakete: usize,
    /// Aufeinanderfolgende Unterlauf-Ticks, die mit Stille ueberbrueckt werden
    pub burst_toleranz: u32,
    /// Fehlgeschlagene Abrufe, ab denen der Sprecher als verstummt gilt
    pub max_fehlversuche: u32,
    /// Gewicht neuer Werte im gleitenden Mittel der verfuegbaren Pakete (0.0–1.0)
    pub durchschnitt_gewicht: f32,
}

impl Default for EmpfangsConfig {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE,
            jitter_margin_frames: 10,
            jitter_max_pakete: 100,
            burst_toleranz: 20,
            max_fehlversuche: 10,
            durchschnitt_gewicht: 0.1,
        }
    }
}

impl EmpfangsConfig {
    /// Validiert die Konfiguration
    pub fn validieren(&self) -> AudioResult<()> {
        if self.frame_size == 0 || SAMPLE_RATE % self.frame_size != 0 {
            return Err(AudioError::Konfiguration(format!(
                "frame_size muss {} Hz ganzzahlig teilen (war: {})",
                SAMPLE_RATE, self.frame_size
            )));
        }
        if self.jitter_max_pakete == 0 {
            return Err(AudioError::Konfiguration(
                "jitter_max_pakete muss groesser 0 sein".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.durchschnitt_gewicht) {
            return Err(AudioError::Konfiguration(format!(
                "durchschnitt_gewicht muss zwischen 0.0 und 1.0 liegen (war: {})",
                self.durchschnitt_gewicht
            )));
        }
        Ok(())
    }

    /// Jitter-Margin in Samples
    pub fn jitter_margin_samples(&self) -> u64 {
        self.jitter_margin_frames as u64 * self.frame_size as u64
    }
}

/// Einstellungen des Sende-Packetizers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketizerConfig {
    /// Frames pro ausgehendem Paket
    pub frames_per_packet: usize,
    /// Maximale Groesse eines kodierten Frames in Bytes (hoechstens 127)
    pub max_frame_bytes: usize,
    /// Ziel-Bitrate in bit/s
    pub bitrate: i32,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            frames_per_packet: 2,
            max_frame_bytes: 127,
            bitrate: 40_000,
        }
    }
}

impl PacketizerConfig {
    /// Validiert die Konfiguration
    pub fn validieren(&self) -> AudioResult<()> {
        if self.frames_per_packet == 0 {
            return Err(AudioError::Konfiguration(
                "frames_per_packet muss groesser 0 sein".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(AudioError::Konfiguration(
                "max_frame_bytes muss groesser 0 sein".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = EmpfangsConfig::default();
        assert!(cfg.validieren().is_ok());
        assert_eq!(cfg.frame_size, 480);
        assert_eq!(cfg.jitter_margin_samples(), 4800);
        assert!(PacketizerConfig::default().validieren().is_ok());
    }

    #[test]
    fn ungueltige_frame_size() {
        let cfg = EmpfangsConfig {
            frame_size: 7,
            ..Default::default()
        };
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn ungueltiges_gewicht() {
        let cfg = EmpfangsConfig {
            durchschnitt_gewicht: 1.5,
            ..Default::default()
        };
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            jitter_margin_frames = 4
            burst_toleranz = 5
        "#;
        let cfg: EmpfangsConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.jitter_margin_frames, 4);
        assert_eq!(cfg.burst_toleranz, 5);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.max_fehlversuche, 10);
    }

    #[test]
    fn packetizer_ohne_frames_ist_ungueltig() {
        let cfg = PacketizerConfig {
            frames_per_packet: 0,
            ..Default::default()
        };
        assert!(cfg.validieren().is_err());
    }
}
