//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Datei):
//! - `SF_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder
//!   `info,sprechfunk_audio=trace`), Standard: info
//! - `SF_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Die Pipeline loggt Sprecher-Ereignisse mit den Feldern `session`,
//! `sequenz` und `codec`. Im Hot Path wird nur auf `trace` geloggt.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "SF_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SF_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum LoggingFehler {
    #[error("Ungueltiger Log-Filter '{filter}': {grund}")]
    UngueltigerFilter { filter: String, grund: String },

    #[error("Ungueltiges Log-Format '{0}' (erlaubt: text, json)")]
    UngueltigesFormat(String),

    #[error("Logging bereits initialisiert")]
    BereitsInitialisiert,
}

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = LoggingFehler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(LoggingFehler::UngueltigesFormat(s.to_string())),
        }
    }
}

/// Logging-Abschnitt der Konfigurationsdatei
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter-Direktive fuer `EnvFilter`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Ueberschreibt Werte mit den Umgebungsvariablen
    pub fn mit_umgebung(self) -> Result<Self, LoggingFehler> {
        self.mit_quelle(|name| std::env::var(name).ok())
    }

    /// Wie [`mit_umgebung`](Self::mit_umgebung), liest aber aus `quelle`
    pub fn mit_quelle<F>(mut self, quelle: F) -> Result<Self, LoggingFehler>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = quelle(ENV_LOG_LEVEL) {
            self.level = level;
        }
        if let Some(format) = quelle(ENV_LOG_FORMAT) {
            self.format = format.parse()?;
        }
        Ok(self)
    }

    fn filter(&self) -> Result<EnvFilter, LoggingFehler> {
        EnvFilter::try_new(&self.level).map_err(|e| LoggingFehler::UngueltigerFilter {
            filter: self.level.clone(),
            grund: e.to_string(),
        })
    }
}

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen ueberschreiben `config`. Ein zweiter Aufruf im selben
/// Prozess liefert [`LoggingFehler::BereitsInitialisiert`].
pub fn logging_initialisieren(config: &LoggingConfig) -> Result<(), LoggingFehler> {
    let config = config.clone().mit_umgebung()?;
    let filter = config.filter()?;

    let ergebnis = match config.format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    ergebnis.map_err(|_| LoggingFehler::BereitsInitialisiert)?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialisiert");
    Ok(())
}

/// Validiert ob ein einfacher Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    format.parse::<LogFormat>().is_ok()
}
