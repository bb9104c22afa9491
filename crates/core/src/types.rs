//! Gemeinsame Identifikationstypen fuer Sprechfunk
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Session-Kennung und Sequenznummer zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

/// Kennung eines entfernten Sprechers (Session des Transport-Layers)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Gibt den rohen Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(wert: u32) -> Self {
        Self(wert)
    }
}

/// Sequenznummer eines Voice-Pakets, vom Transport-Layer vergeben
///
/// Eine Sequenz entspricht genau einem Basis-Frame (10 ms).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequenz(pub u64);

impl Sequenz {
    /// Berechnet den Jitter-Buffer-Zeitstempel (`frame_size * sequenz`)
    ///
    /// Rechnet modulo 2^64.
    pub fn zeitstempel(&self, frame_size: u32) -> u64 {
        self.0.wrapping_mul(frame_size as u64)
    }

    /// Naechste Sequenznummer
    pub fn naechste(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for Sequenz {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

impl From<u64> for Sequenz {
    fn from(wert: u64) -> Self {
        Self(wert)
    }
}
