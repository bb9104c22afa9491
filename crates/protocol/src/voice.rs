//! Voice-Paket-Grammatik
//!
//! Aufbau eines Voice-Pakets nach dem Entfernen des Transport-Headers:
//!
//! ```text
//! Opus:
//!   Byte 0      Flags (hier ignoriert)
//!   Varint      Groesse: Bits 0..12 = Nutzdatenlaenge, Bit 13 (0x2000) = Terminator
//!   N Bytes     Opus-Nutzdaten
//!
//! CELT / Speex:
//!   Byte 0      Flags (hier ignoriert)
//!   wiederholt: Header-Byte  Bits 0..6 = Laenge, Bit 7 (0x80) = weitere Subframes folgen
//!               N Bytes      Subframe
//!   Header 0x00 beendet den Sprechvorgang (Terminator)
//! ```

use serde::{Deserialize, Serialize};
use sprechfunk_core::{Result, SprechfunkError};

use crate::codec::opus_samples_pro_frame;
use crate::cursor::{PacketCursor, PacketWriter};

/// Bit 13 im Opus-Groessenfeld: letztes Paket eines Sprechvorgangs
pub const OPUS_TERMINATOR_BIT: u64 = 0x2000;

/// Maske fuer die Opus-Nutzdatenlaenge (13 Bit)
pub const OPUS_LAENGE_MASKE: u64 = 0x1FFF;

/// Header-Bit: weitere Subframes folgen im selben Paket
pub const FORTSETZUNG_BIT: u8 = 0x80;

/// Maske fuer die Subframe-Laenge im Header-Byte
pub const SUBFRAME_LAENGE_MASKE: u8 = 0x7F;

// ---------------------------------------------------------------------------
// CodecKind
// ---------------------------------------------------------------------------

/// Codec eines Voice-Streams
///
/// Wird beim Anlegen eines Streams festgelegt und aendert sich danach nicht.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    /// CELT 0.7.0
    CeltAlpha,
    /// Speex (Ultra-Wideband)
    Speex,
    /// CELT 0.11.0
    CeltBeta,
    /// Opus
    Opus,
}

impl CodecKind {
    /// Leitet den Codec aus den oberen 3 Bit des UDP-Typ-Bytes ab
    pub fn from_udp_typ(typ: u8) -> Result<Self> {
        match typ >> 5 {
            0 => Ok(Self::CeltAlpha),
            2 => Ok(Self::Speex),
            3 => Ok(Self::CeltBeta),
            4 => Ok(Self::Opus),
            andere => Err(SprechfunkError::UnbekannterCodec(andere)),
        }
    }

    /// Codec-Kennung fuer die oberen 3 Bit des UDP-Typ-Bytes
    pub fn udp_typ(&self) -> u8 {
        let id = match self {
            Self::CeltAlpha => 0,
            Self::Speex => 2,
            Self::CeltBeta => 3,
            Self::Opus => 4,
        };
        id << 5
    }

    /// true fuer Opus (Varint-Groessenfeld statt Subframe-Kette)
    pub fn ist_opus(&self) -> bool {
        matches!(self, Self::Opus)
    }

    /// Anzahl Basis-Frames, die ein einzelner Decode-Aufruf maximal liefert
    pub fn decode_basis_frames(&self) -> u32 {
        match self {
            Self::Opus => crate::codec::OPUS_MAX_BASIS_FRAMES,
            _ => 1,
        }
    }

    /// Faktor, mit dem dekodierte Samples in -1.0..1.0 ueberfuehrt werden
    pub fn pcm_skalierung(&self) -> Option<f32> {
        match self {
            Self::Speex => Some(crate::codec::SPEEX_SKALIERUNG),
            _ => None,
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CeltAlpha => "celt-alpha",
            Self::Speex => "speex",
            Self::CeltBeta => "celt-beta",
            Self::Opus => "opus",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Paket zerlegen
// ---------------------------------------------------------------------------

/// Ergebnis der Zerlegung eines Voice-Pakets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZerlegtesPaket<'a> {
    /// Flags-Byte (fuer diese Pipeline bedeutungslos)
    pub flags: u8,
    /// Decoder-Eingaben in Paketreihenfolge
    pub subframes: Vec<&'a [u8]>,
    /// Paket beendet den Sprechvorgang
    pub terminator: bool,
    /// Vom Paket abgedeckte Samples (Span im Jitter Buffer)
    pub samples: u32,
    /// Nur Opus: Samples pro Frame laut TOC (None bei leerer Nutzlast)
    pub opus_samples_pro_frame: Option<u32>,
}

/// Zerlegt ein Voice-Paket nach der Grammatik des Codecs
///
/// `frame_size` ist die Basis-Frame-Groesse. Liest die Grammatik ueber das
/// Paketende hinaus, wird [`SprechfunkError::DatenEnde`] geliefert.
pub fn paket_zerlegen(kind: CodecKind, daten: &[u8], frame_size: u32) -> Result<ZerlegtesPaket<'_>> {
    let mut cursor = PacketCursor::new(daten);
    let flags = cursor.next_byte();

    let mut subframes = Vec::new();
    let mut terminator = false;
    let mut samples = 0u32;
    let mut pro_frame = None;

    if kind.ist_opus() {
        let groesse = cursor.read_varint();
        terminator = groesse & OPUS_TERMINATOR_BIT != 0;
        let nutzlast = cursor.data_block((groesse & OPUS_LAENGE_MASKE) as usize);
        pro_frame = opus_samples_pro_frame(nutzlast, crate::codec::SAMPLE_RATE);
        samples = match crate::codec::opus_samples_gesamt(nutzlast, crate::codec::SAMPLE_RATE) {
            Some(s) if s > 0 => s,
            // Leere Nutzlast (reines Terminator-Paket) deckt einen Tick ab
            _ => frame_size,
        };
        subframes.push(nutzlast);
    } else {
        loop {
            let header = cursor.next_byte();
            samples = samples.saturating_add(frame_size);
            if header == 0 {
                terminator = true;
            } else {
                subframes.push(cursor.data_block((header & SUBFRAME_LAENGE_MASKE) as usize));
            }
            if header & FORTSETZUNG_BIT == 0 || !cursor.is_valid() {
                break;
            }
        }
    }

    if !cursor.is_valid() {
        tracing::trace!(codec = %kind, laenge = daten.len(), "Paketgrammatik reicht ueber das Datenende");
    }
    cursor.require_valid()?;

    Ok(ZerlegtesPaket {
        flags,
        subframes,
        terminator,
        samples,
        opus_samples_pro_frame: pro_frame,
    })
}

/// Schreibt ein Opus-Voice-Paket (Flags, Groessen-Varint, Nutzdaten)
pub fn opus_paket_schreiben(
    writer: &mut PacketWriter,
    flags: u8,
    nutzlast: &[u8],
    terminator: bool,
) -> Result<()> {
    if nutzlast.len() as u64 > OPUS_LAENGE_MASKE {
        return Err(SprechfunkError::UngueltigeNachricht(format!(
            "Opus-Nutzlast zu gross: {} Bytes (max {})",
            nutzlast.len(),
            OPUS_LAENGE_MASKE
        )));
    }
    let mut groesse = nutzlast.len() as u64;
    if terminator {
        groesse |= OPUS_TERMINATOR_BIT;
    }
    writer.append(flags);
    writer.write_varint(groesse);
    writer.append_slice(nutzlast);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FRAME_SIZE;

    #[test]
    fn codec_aus_udp_typ() {
        assert_eq!(CodecKind::from_udp_typ(0x80).unwrap(), CodecKind::Opus);
        assert_eq!(CodecKind::from_udp_typ(0x40).unwrap(), CodecKind::Speex);
        assert_eq!(CodecKind::from_udp_typ(0x60).unwrap(), CodecKind::CeltBeta);
        assert_eq!(CodecKind::from_udp_typ(0x00).unwrap(), CodecKind::CeltAlpha);
        // Typ 1 = Ping, kein Audio
        assert!(CodecKind::from_udp_typ(0x20).is_err());
        for kind in [CodecKind::Opus, CodecKind::Speex, CodecKind::CeltAlpha, CodecKind::CeltBeta] {
            assert_eq!(CodecKind::from_udp_typ(kind.udp_typ()).unwrap(), kind);
        }
    }

    #[test]
    fn codec_aus_toml_konfiguration() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            codec: CodecKind,
        }
        let w: Wrapper = toml::from_str("codec = \"celt_beta\"").unwrap();
        assert_eq!(w.codec, CodecKind::CeltBeta);
    }

    #[test]
    fn nur_speex_wird_skaliert() {
        assert!(CodecKind::Speex.pcm_skalierung().is_some());
        assert!(CodecKind::Opus.pcm_skalierung().is_none());
        assert!(CodecKind::CeltAlpha.pcm_skalierung().is_none());
    }

    #[test]
    fn kette_mit_drei_subframes() {
        let paket = [0x00, 0x82, 1, 2, 0x81, 3, 0x03, 4, 5, 6];
        let z = paket_zerlegen(CodecKind::CeltAlpha, &paket, FRAME_SIZE).unwrap();
        assert_eq!(z.subframes, vec![&[1u8, 2][..], &[3u8][..], &[4u8, 5, 6][..]]);
        assert_eq!(z.samples, 3 * FRAME_SIZE);
        assert!(!z.terminator);
    }

    #[test]
    fn kette_mit_terminator_header() {
        let paket = [0x00, 0x81, 9, 0x00];
        let z = paket_zerlegen(CodecKind::Speex, &paket, FRAME_SIZE).unwrap();
        assert_eq!(z.subframes, vec![&[9u8][..]]);
        assert!(z.terminator);
        assert_eq!(z.samples, 2 * FRAME_SIZE);
    }

    #[test]
    fn kette_ueber_datenende_ist_fehler() {
        // Header verspricht 5 Bytes, nur 2 vorhanden
        let paket = [0x00, 0x05, 1, 2];
        assert!(paket_zerlegen(CodecKind::CeltBeta, &paket, FRAME_SIZE).is_err());

        // Fortsetzungsbit ohne weiteren Header
        let paket = [0x00, 0x81, 1];
        assert!(paket_zerlegen(CodecKind::CeltBeta, &paket, FRAME_SIZE).is_err());
    }

    #[test]
    fn opus_paket_mit_terminator() {
        let nutzlast = [1u8 << 3, 0xAA, 0xBB];
        let mut w = PacketWriter::new();
        opus_paket_schreiben(&mut w, 0x80, &nutzlast, true).unwrap();

        let z = paket_zerlegen(CodecKind::Opus, w.as_slice(), FRAME_SIZE).unwrap();
        assert_eq!(z.flags, 0x80);
        assert!(z.terminator);
        assert_eq!(z.subframes, vec![&nutzlast[..]]);
        assert_eq!(z.opus_samples_pro_frame, Some(960));
        assert_eq!(z.samples, 960);
    }

    #[test]
    fn opus_groesse_wird_auf_13_bit_maskiert() {
        // Groesse 0x2002: Terminator + 2 Bytes Nutzlast
        let mut w = PacketWriter::new();
        w.append(0);
        w.write_varint(0x2002);
        w.append_slice(&[0, 0xFF]);
        let z = paket_zerlegen(CodecKind::Opus, w.as_slice(), FRAME_SIZE).unwrap();
        assert_eq!(z.subframes[0].len(), 2);
        assert!(z.terminator);
    }

    #[test]
    fn leeres_opus_terminator_paket() {
        let mut w = PacketWriter::new();
        opus_paket_schreiben(&mut w, 0, &[], true).unwrap();
        let z = paket_zerlegen(CodecKind::Opus, w.as_slice(), FRAME_SIZE).unwrap();
        assert!(z.terminator);
        assert_eq!(z.opus_samples_pro_frame, None);
        assert_eq!(z.samples, FRAME_SIZE);
    }

    #[test]
    fn opus_nutzlast_zu_gross() {
        let mut w = PacketWriter::new();
        let nutzlast = vec![0u8; 0x2000];
        assert!(opus_paket_schreiben(&mut w, 0, &nutzlast, false).is_err());
        assert!(w.is_empty());
    }
}
