//! Audio-Format und Opus-Paket-Introspektion
//!
//! Die Pipeline arbeitet fest mit 48 kHz Mono. Ein Basis-Frame umfasst
//! 10 ms (480 Samples); alle Zeitstempel im Jitter Buffer sind Vielfache
//! davon.

/// Abtastrate der Pipeline in Hz
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples pro Basis-Frame (10 ms)
pub const FRAME_SIZE: u32 = SAMPLE_RATE / 100;

/// Maximale Opus-Framedauer in Basis-Frames (120 ms)
pub const OPUS_MAX_BASIS_FRAMES: u32 = 12;

/// Skalierung von Speex-Ganzzahl-PCM in den Bereich -1.0..1.0
pub const SPEEX_SKALIERUNG: f32 = 1.0 / 32767.0;

// ---------------------------------------------------------------------------
// Opus-TOC
// ---------------------------------------------------------------------------

/// Samples pro Opus-Frame laut TOC-Byte bei gegebener Abtastrate
///
/// Gibt `None` fuer ein leeres Paket zurueck.
pub fn opus_samples_pro_frame(paket: &[u8], sample_rate: u32) -> Option<u32> {
    let toc = *paket.first()?;
    let samples = if toc & 0x80 != 0 {
        // CELT-only: 2.5 / 5 / 10 / 20 ms
        let stufe = (toc >> 3) & 0x03;
        (sample_rate << stufe) / 400
    } else if toc & 0x60 == 0x60 {
        // Hybrid: 10 / 20 ms
        if toc & 0x08 != 0 {
            sample_rate / 50
        } else {
            sample_rate / 100
        }
    } else {
        // SILK-only: 10 / 20 / 40 / 60 ms
        let stufe = (toc >> 3) & 0x03;
        if stufe == 3 {
            sample_rate * 60 / 1000
        } else {
            (sample_rate << stufe) / 100
        }
    };
    Some(samples)
}

/// Anzahl der Frames in einem Opus-Paket (TOC-Code 0–3)
pub fn opus_anzahl_frames(paket: &[u8]) -> Option<u32> {
    let toc = *paket.first()?;
    match toc & 0x03 {
        0 => Some(1),
        1 | 2 => Some(2),
        _ => paket.get(1).map(|b| (b & 0x3F) as u32),
    }
}

/// Gesamtzahl der Samples eines Opus-Pakets
pub fn opus_samples_gesamt(paket: &[u8], sample_rate: u32) -> Option<u32> {
    Some(opus_anzahl_frames(paket)? * opus_samples_pro_frame(paket, sample_rate)?)
}
