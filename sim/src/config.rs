//! Simulator-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Simulator ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use sprechfunk_audio::{EmpfangsConfig, PacketizerConfig};
use sprechfunk_observability::LoggingConfig;

/// Vollstaendige Simulator-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Einstellungen der Empfangs-Streams
    pub empfang: EmpfangsConfig,
    /// Sendeseite (nur `bitrate` wird fuer Opus verwendet)
    pub packetizer: PacketizerConfig,
    /// Sprecher und Netzverhalten
    pub netz: NetzEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingConfig,
}

/// Sprecher und Netzverhalten
///
/// Alle Zeitangaben in Audio-Bloecken (ein Basis-Frame, 10 ms).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzEinstellungen {
    /// Anzahl gleichzeitiger Sprecher
    pub sprecher: u32,
    /// Pakete pro Sprechvorgang
    pub pakete: u32,
    /// Sprechvorgaenge pro Sprecher
    pub sprechphasen: u32,
    /// Pause zwischen zwei Sprechvorgaengen
    pub pause_bloecke: u32,
    /// Grundlaufzeit jedes Pakets
    pub latenz_bloecke: u32,
    /// Jedes n-te Paket wird zusaetzlich verzoegert (0 = nie)
    pub jitter_jedes_n: u32,
    /// Zusaetzliche Verzoegerung der betroffenen Pakete
    pub jitter_bloecke: u32,
    /// Jedes n-te Paket geht verloren (0 = nie)
    pub verlust_jedes_n: u32,
}

impl Default for NetzEinstellungen {
    fn default() -> Self {
        Self {
            sprecher: 3,
            pakete: 200,
            sprechphasen: 2,
            pause_bloecke: 50,
            latenz_bloecke: 3,
            jitter_jedes_n: 7,
            jitter_bloecke: 2,
            verlust_jedes_n: 25,
        }
    }
}

impl SimConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft alle Abschnitte
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.empfang.validieren()?;
        self.packetizer.validieren()?;
        if self.netz.sprecher == 0 || self.netz.pakete == 0 || self.netz.sprechphasen == 0 {
            anyhow::bail!("netz: sprecher, pakete und sprechphasen muessen groesser 0 sein");
        }
        Ok(())
    }

    /// Anzahl simulierter Audio-Bloecke (mit Nachlauf fuer das Verstummen)
    pub fn bloecke_gesamt(&self) -> u64 {
        let netz = &self.netz;
        let phasen = netz.sprechphasen as u64;
        let sprechdauer = phasen * netz.pakete as u64 + (phasen - 1) * netz.pause_bloecke as u64;
        let versatz = (netz.sprecher as u64 - 1) * SPRECHER_VERSATZ;
        let nachlauf = (netz.latenz_bloecke + netz.jitter_bloecke) as u64
            + self.empfang.max_fehlversuche as u64
            + self.empfang.burst_toleranz as u64
            + 10;
        versatz + sprechdauer + nachlauf
    }
}

/// Startversatz zwischen zwei Sprechern in Bloecken
pub const SPRECHER_VERSATZ: u64 = 10;
