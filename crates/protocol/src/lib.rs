//! sprechfunk-protocol – Wire-Format der Voice-Pakete
//!
//! Dieses Crate beschreibt, wie ein empfangenes Voice-Paket (nach dem
//! Entfernen des Transport-Headers) aufgebaut ist und wie es gelesen bzw.
//! geschrieben wird.
//!
//! ## Module
//! - [`cursor`] – Byte-Cursor mit Varint-Lesen und expliziter Datenende-Signalisierung
//! - [`voice`] – Codec-Arten und die Subframe-Grammatik pro Codec
//! - [`codec`] – Audio-Format-Konstanten und Opus-TOC-Auswertung

pub mod codec;
pub mod cursor;
pub mod voice;

pub use codec::{FRAME_SIZE, SAMPLE_RATE};
pub use cursor::{PacketCursor, PacketWriter};
pub use voice::{opus_paket_schreiben, paket_zerlegen, CodecKind, ZerlegtesPaket};
