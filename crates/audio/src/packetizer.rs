//! Sendeseite: sammelt kodierte Frames und schreibt sie als Kette
//!
//! Ein Paket besteht aus `frames_per_packet` Frames. Jeder Frame wird mit
//! einem Header-Byte eingeleitet (Bits 0..6 = Laenge, Bit 7 = weitere Frames
//! folgen). Dieselbe Grammatik liest [`sprechfunk_protocol::paket_zerlegen`].

use sprechfunk_protocol::voice::{FORTSETZUNG_BIT, SUBFRAME_LAENGE_MASKE};
use sprechfunk_protocol::PacketWriter;
use tracing::{debug, trace};

use crate::codec::FrameEncoder;
use crate::config::PacketizerConfig;
use crate::error::{AudioError, AudioResult};

/// Sammelt kodierte Frames fuer ein ausgehendes Paket
pub struct FrameEncodePacketizer<E: FrameEncoder> {
    encoder: Option<E>,
    frames_per_packet: usize,
    /// Bytes pro Frame-Slot (hoechstens 127)
    slot: usize,
    daten: Vec<u8>,
    laengen: Vec<usize>,
    terminieren: bool,
}

impl<E: FrameEncoder> FrameEncodePacketizer<E> {
    /// Erstellt einen Packetizer und setzt die konfigurierte Bitrate
    pub fn new(mut encoder: E, config: PacketizerConfig) -> AudioResult<Self> {
        config.validieren()?;
        encoder.set_bitrate(config.bitrate)?;

        let slot = config.max_frame_bytes.min(SUBFRAME_LAENGE_MASKE as usize);
        debug!(
            frames = config.frames_per_packet,
            slot,
            bitrate = config.bitrate,
            "Packetizer angelegt"
        );

        Ok(Self {
            encoder: Some(encoder),
            frames_per_packet: config.frames_per_packet,
            slot,
            daten: vec![0; slot * config.frames_per_packet],
            laengen: Vec::with_capacity(config.frames_per_packet),
            terminieren: false,
        })
    }

    /// Kodiert einen PCM-Frame in den naechsten freien Slot
    ///
    /// Ist das Paket bereits voll, wird nichts veraendert.
    pub fn encode(&mut self, pcm: &[f32]) -> AudioResult<()> {
        let gepuffert = self.laengen.len();
        if gepuffert >= self.frames_per_packet {
            return Err(AudioError::PufferVoll {
                gepuffert,
                kapazitaet: self.frames_per_packet,
            });
        }
        let encoder = self.encoder.as_mut().ok_or(AudioError::StreamZerstoert)?;

        let start = gepuffert * self.slot;
        let ziel = &mut self.daten[start..start + self.slot];
        let n = encoder.encode(pcm, ziel)?;
        if n == 0 || n > self.slot {
            return Err(AudioError::CodecFehler(format!(
                "Ungueltige Framegroesse {} (Slot: {} Bytes)",
                n, self.slot
            )));
        }

        self.laengen.push(n);
        trace!(frame = gepuffert, bytes = n, "Frame kodiert");
        Ok(())
    }

    /// true sobald alle Frames des Pakets kodiert sind
    pub fn is_ready(&self) -> bool {
        self.laengen.len() >= self.frames_per_packet
    }

    /// Anzahl bereits kodierter Frames
    pub fn gepufferte_frames(&self) -> usize {
        self.laengen.len()
    }

    /// Frames pro Paket
    pub fn frames_per_packet(&self) -> usize {
        self.frames_per_packet
    }

    /// Schreibt alle Frames als Kette und leert den Packetizer
    pub fn flush(&mut self, writer: &mut PacketWriter) -> AudioResult<()> {
        if !self.is_ready() {
            return Err(AudioError::PufferLeer {
                gepuffert: self.laengen.len(),
                kapazitaet: self.frames_per_packet,
            });
        }

        let letzter = self.laengen.len() - 1;
        for (i, &laenge) in self.laengen.iter().enumerate() {
            let mut header = laenge as u8;
            if i < letzter || self.terminieren {
                header |= FORTSETZUNG_BIT;
            }
            let start = i * self.slot;
            writer.append(header);
            writer.append_slice(&self.daten[start..start + laenge]);
        }
        if self.terminieren {
            writer.append(0x00);
            debug!("Sprechvorgang beendet");
        }

        self.laengen.clear();
        self.terminieren = false;
        Ok(())
    }

    /// Setzt die Bitrate des Encoders
    pub fn set_bitrate(&mut self, bitrate: i32) -> AudioResult<()> {
        self.encoder
            .as_mut()
            .ok_or(AudioError::StreamZerstoert)?
            .set_bitrate(bitrate)
    }

    /// Das naechste Paket beendet den Sprechvorgang (Header 0x00 am Ende)
    pub fn terminate(&mut self) {
        self.terminieren = true;
    }

    /// Gibt den Encoder frei (wiederholte Aufrufe sind wirkungslos)
    pub fn destroy(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.destroy();
            self.laengen.clear();
            debug!("Packetizer freigegeben");
        }
    }
}

impl<E: FrameEncoder> Drop for FrameEncodePacketizer<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_protocol::{paket_zerlegen, CodecKind, FRAME_SIZE};

    /// Schreibt die ersten PCM-Werte als Bytes
    struct TestEncoder {
        bitrate: i32,
    }

    impl FrameEncoder for TestEncoder {
        fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
            let n = (pcm[0] as usize).min(ausgabe.len());
            ausgabe[..n].fill(pcm[1] as u8);
            Ok(n)
        }

        fn set_bitrate(&mut self, bitrate: i32) -> AudioResult<()> {
            self.bitrate = bitrate;
            Ok(())
        }
    }

    fn packetizer(frames: usize) -> FrameEncodePacketizer<TestEncoder> {
        let config = PacketizerConfig {
            frames_per_packet: frames,
            ..Default::default()
        };
        FrameEncodePacketizer::new(TestEncoder { bitrate: 0 }, config).unwrap()
    }

    #[test]
    fn kette_mit_fortsetzungsbits() {
        let mut p = packetizer(3);
        p.encode(&[2.0, 11.0]).unwrap();
        p.encode(&[1.0, 22.0]).unwrap();
        assert!(!p.is_ready());
        p.encode(&[3.0, 33.0]).unwrap();
        assert!(p.is_ready());

        let mut w = PacketWriter::new();
        w.append(0x00);
        p.flush(&mut w).unwrap();
        assert_eq!(
            w.as_slice(),
            &[0x00, 0x82, 11, 11, 0x81, 22, 0x03, 33, 33, 33]
        );
        assert_eq!(p.gepufferte_frames(), 0);

        let z = paket_zerlegen(CodecKind::CeltAlpha, w.as_slice(), FRAME_SIZE).unwrap();
        assert_eq!(z.subframes.len(), 3);
        assert!(!z.terminator);
    }

    #[test]
    fn encode_wenn_voll_ohne_nebenwirkung() {
        let mut p = packetizer(1);
        p.encode(&[1.0, 5.0]).unwrap();
        let err = p.encode(&[1.0, 9.0]).unwrap_err();
        assert!(err.ist_kapazitaetsfehler());

        let mut w = PacketWriter::new();
        p.flush(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[0x01, 5]);
    }

    #[test]
    fn flush_wenn_nicht_bereit_ohne_nebenwirkung() {
        let mut p = packetizer(2);
        p.encode(&[1.0, 5.0]).unwrap();

        let mut w = PacketWriter::new();
        let err = p.flush(&mut w).unwrap_err();
        assert!(matches!(err, AudioError::PufferLeer { gepuffert: 1, kapazitaet: 2 }));
        assert!(w.is_empty());
        assert_eq!(p.gepufferte_frames(), 1);
    }

    #[test]
    fn leerer_frame_ist_codec_fehler() {
        let mut p = packetizer(2);
        let err = p.encode(&[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, AudioError::CodecFehler(_)));
        assert_eq!(p.gepufferte_frames(), 0);
    }

    #[test]
    fn terminate_haengt_abschluss_header_an() {
        let mut p = packetizer(1);
        p.terminate();
        p.encode(&[2.0, 7.0]).unwrap();

        let mut w = PacketWriter::new();
        w.append(0x40);
        p.flush(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[0x40, 0x82, 7, 7, 0x00]);

        let z = paket_zerlegen(CodecKind::Speex, w.as_slice(), FRAME_SIZE).unwrap();
        assert!(z.terminator);
        assert_eq!(z.subframes, vec![&[7u8, 7][..]]);

        // Nur das naechste Paket wird terminiert
        p.encode(&[1.0, 1.0]).unwrap();
        let mut w = PacketWriter::new();
        p.flush(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[0x01, 1]);
    }

    #[test]
    fn slot_ist_auf_7_bit_begrenzt() {
        let config = PacketizerConfig {
            frames_per_packet: 1,
            max_frame_bytes: 500,
            ..Default::default()
        };
        let mut p = FrameEncodePacketizer::new(TestEncoder { bitrate: 0 }, config).unwrap();
        p.encode(&[255.0, 3.0]).unwrap();

        let mut w = PacketWriter::new();
        p.flush(&mut w).unwrap();
        assert_eq!(w.as_slice()[0], 127);
        assert_eq!(w.len(), 128);
    }

    #[test]
    fn bitrate_wird_weitergereicht() {
        let mut p = packetizer(1);
        assert_eq!(p.encoder.as_ref().unwrap().bitrate, 40_000);
        p.set_bitrate(24_000).unwrap();
        assert_eq!(p.encoder.as_ref().unwrap().bitrate, 24_000);
    }

    #[test]
    fn nach_destroy_kein_encode() {
        let mut p = packetizer(1);
        p.destroy();
        p.destroy();
        assert!(matches!(
            p.encode(&[1.0, 1.0]).unwrap_err(),
            AudioError::StreamZerstoert
        ));
    }
}
