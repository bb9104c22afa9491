//! # sprechfunk-observability
//!
//! Structured Logging via tracing-subscriber (Text oder JSON), gesteuert
//! ueber Konfiguration und Umgebungsvariablen.

pub mod logging;

pub use logging::{
    log_format_gueltig, log_level_gueltig, logging_initialisieren, LogFormat, LoggingConfig,
    LoggingFehler,
};
