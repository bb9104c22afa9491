//! sprechfunk-core – Gemeinsame Typen, Ereignisse und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sprechfunk-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SprechfunkError};
pub use event::SprecherEreignis;
pub use types::{Sequenz, SessionId};
