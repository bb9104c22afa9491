//! Codec-Primitive: Decoder und Encoder als austauschbare Faehigkeiten
//!
//! Der Decode-Scheduler kennt nur die Traits [`FrameDecoder`] und
//! [`FrameEncoder`]. Fuer Opus gibt es eine Implementierung auf Basis von
//! audiopus. CELT- und Speex-Primitive werden vom Aufrufer eingebracht;
//! die Skalierung von Speex-PCM uebernimmt der Stream anhand des
//! [`CodecKind`](sprechfunk_protocol::CodecKind).

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use sprechfunk_protocol::codec::{FRAME_SIZE, SAMPLE_RATE};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Dekodiert genau einen komprimierten Frame in PCM
pub trait FrameDecoder: Send {
    /// Dekodiert `eingabe` nach `ausgabe` und liefert die Anzahl Samples
    ///
    /// `None` fordert Loss Concealment an: der Decoder erzeugt eine
    /// plausible Fortsetzung ohne Eingabedaten.
    fn decode(&mut self, eingabe: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize>;

    /// Gibt native Ressourcen frei; weitere Aufrufe sind wirkungslos
    fn destroy(&mut self) {}
}

/// Kodiert genau einen PCM-Frame
pub trait FrameEncoder: Send {
    /// Kodiert `pcm` nach `ausgabe` und liefert die Anzahl Bytes
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize>;

    /// Setzt die Ziel-Bitrate in bit/s
    fn set_bitrate(&mut self, _bitrate: i32) -> AudioResult<()> {
        Ok(())
    }

    /// Gibt native Ressourcen frei; weitere Aufrufe sind wirkungslos
    fn destroy(&mut self) {}
}

impl<T: FrameDecoder + ?Sized> FrameDecoder for Box<T> {
    fn decode(&mut self, eingabe: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize> {
        (**self).decode(eingabe, ausgabe)
    }

    fn destroy(&mut self) {
        (**self).destroy()
    }
}

impl<T: FrameEncoder + ?Sized> FrameEncoder for Box<T> {
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
        (**self).encode(pcm, ausgabe)
    }

    fn set_bitrate(&mut self, bitrate: i32) -> AudioResult<()> {
        (**self).set_bitrate(bitrate)
    }

    fn destroy(&mut self) {
        (**self).destroy()
    }
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

/// Opus-Decoder (48 kHz, Mono): dekodiert Opus-Bytes zu f32-PCM
pub struct OpusFrameDecoder {
    decoder: Option<Decoder>,
}

impl OpusFrameDecoder {
    /// Erstellt einen neuen Decoder
    ///
    /// Schlaegt die Initialisierung in libopus fehl, wird kein Stream angelegt.
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        debug!("OpusFrameDecoder erstellt: {} Hz Mono", SAMPLE_RATE);
        Ok(Self {
            decoder: Some(decoder),
        })
    }
}

impl FrameDecoder for OpusFrameDecoder {
    fn decode(&mut self, eingabe: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize> {
        let decoder = self.decoder.as_mut().ok_or(AudioError::StreamZerstoert)?;
        let decoded = match eingabe {
            Some(daten) => decoder.decode_float(Some(daten), ausgabe, false),
            None => {
                // PLC erzeugt genau einen Basis-Frame
                let laenge = ausgabe.len().min(FRAME_SIZE as usize);
                decoder.decode_float(None::<&[u8]>, &mut ausgabe[..laenge], false)
            }
        }
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(decoded)
    }

    fn destroy(&mut self) {
        if self.decoder.take().is_some() {
            debug!("OpusFrameDecoder freigegeben");
        }
    }
}

/// Opus-Encoder (48 kHz, Mono, VOIP): kodiert einen 10-ms-Frame
pub struct OpusFrameEncoder {
    encoder: Option<Encoder>,
    frame_size: usize,
}

impl OpusFrameEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Bitrate
    pub fn new(bitrate: i32) -> AudioResult<Self> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(bitrate))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        debug!("OpusFrameEncoder erstellt: {}bps, frame_size={}", bitrate, FRAME_SIZE);

        Ok(Self {
            encoder: Some(encoder),
            frame_size: FRAME_SIZE as usize,
        })
    }

    /// Gibt die erwartete Frame-Groesse in Samples zurueck
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }
        let encoder = self.encoder.as_mut().ok_or(AudioError::StreamZerstoert)?;
        encoder
            .encode_float(pcm, ausgabe)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))
    }

    fn set_bitrate(&mut self, bitrate: i32) -> AudioResult<()> {
        let encoder = self.encoder.as_mut().ok_or(AudioError::StreamZerstoert)?;
        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(bitrate))
            .map_err(|e| AudioError::CodecFehler(e.to_string()))
    }

    fn destroy(&mut self) {
        if self.encoder.take().is_some() {
            debug!("OpusFrameEncoder freigegeben");
        }
    }
}
