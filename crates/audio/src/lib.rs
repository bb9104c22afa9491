//! sprechfunk-audio – Empfangsseitige Voice-Pipeline
//!
//! Vom Netzwerk bis zum PCM-Block:
//! - Adaptiver Jitter Buffer (Sortierung, Verspaetung, Verzoegerungs-Anpassung)
//! - Decode-Scheduler pro Sprecher mit Loss Concealment
//! - Sprechzustands-Erkennung (Terminator und anhaltender Verlust)
//! - Opus Encoding/Decoding via audiopus
//! - Packetizer fuer die Sendeseite
//! - Session-Registry zwischen Netzwerk- und Audio-Thread

pub mod codec;
pub mod config;
pub mod error;
pub mod jitter_buffer;
pub mod packetizer;
pub mod registry;
pub mod stream;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{FrameDecoder, FrameEncoder, OpusFrameDecoder, OpusFrameEncoder};
pub use config::{EmpfangsConfig, PacketizerConfig};
pub use error::{AudioError, AudioResult};
pub use jitter_buffer::{
    AdaptiveJitterBuffer, DelayAnpassung, DelayHinweis, JitterBuffer, JitterBufferConfig,
    JitterBufferStatistik, JitterPaket,
};
pub use packetizer::FrameEncodePacketizer;
pub use registry::{DecoderFabrik, SessionRegistry, SpeakerSet, StreamEreignis};
pub use stream::{PacketSubmitter, SpeakerStream, StreamStatistik};
