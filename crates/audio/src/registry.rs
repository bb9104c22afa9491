//! Verwaltung aller Empfangs-Streams
//!
//! Die [`SessionRegistry`] lebt auf der Netzwerk-Seite: sie legt beim ersten
//! Paket einer Session einen [`SpeakerStream`] an und reicht ihn ueber einen
//! crossbeam-Kanal an den Audio-Thread weiter. Dort sammelt das
//! [`SpeakerSet`] die Streams, fragt sie pro Audio-Block ab und meldet
//! Sprechzustands-Wechsel.
//!
//! Streams werden ausschliesslich auf dem Audio-Thread zerstoert, damit
//! `destroy` nie parallel zu `request_samples` laeuft.

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sprechfunk_core::{SprecherEreignis, Sequenz, SessionId};
use sprechfunk_protocol::CodecKind;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::codec::FrameDecoder;
use crate::config::EmpfangsConfig;
use crate::error::{AudioError, AudioResult};
use crate::stream::{PacketSubmitter, SpeakerStream};

/// Erzeugt den Decoder fuer einen neuen Stream
pub type DecoderFabrik =
    Box<dyn Fn(CodecKind) -> AudioResult<Box<dyn FrameDecoder>> + Send + Sync>;

/// Nachricht von der Registry an den Audio-Thread
pub enum StreamEreignis {
    /// Neuer Stream (ersetzt einen vorhandenen Stream derselben Session)
    Neu(SpeakerStream),
    /// Stream soll zerstoert werden
    Entfernt(SessionId),
}

impl std::fmt::Debug for StreamEreignis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neu(stream) => f.debug_tuple("Neu").field(&stream.session()).finish(),
            Self::Entfernt(session) => f.debug_tuple("Entfernt").field(session).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Einlieferungsseite aller Sprecher (thread-safe, guenstig klonbar)
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: EmpfangsConfig,
    fabrik: DecoderFabrik,
    submitter: DashMap<SessionId, PacketSubmitter>,
    sender: Sender<StreamEreignis>,
}

impl SessionRegistry {
    /// Erstellt eine leere Registry samt Empfaenger fuer den Audio-Thread
    pub fn new(
        config: EmpfangsConfig,
        fabrik: DecoderFabrik,
    ) -> AudioResult<(Self, Receiver<StreamEreignis>)> {
        config.validieren()?;
        let (sender, empfaenger) = unbounded();
        let registry = Self {
            inner: Arc::new(RegistryInner {
                config,
                fabrik,
                submitter: DashMap::new(),
                sender,
            }),
        };
        Ok((registry, empfaenger))
    }

    /// Nimmt ein Voice-Paket einer Session entgegen
    ///
    /// Legt beim ersten Paket (oder Codec-Wechsel) einen neuen Stream an.
    /// Fehler entstehen nur beim Anlegen eines Streams.
    pub fn packet_received(
        &self,
        session: SessionId,
        codec: CodecKind,
        daten: &[u8],
        sequenz: Sequenz,
    ) -> AudioResult<()> {
        let submitter = match self.inner.submitter.entry(session) {
            Entry::Occupied(mut eintrag) => {
                if eintrag.get().codec() != codec || !eintrag.get().ist_aktiv() {
                    tracing::debug!(%session, %codec, "Stream wird neu angelegt");
                    eintrag.insert(self.stream_anlegen(session, codec)?);
                }
                eintrag.get().clone()
            }
            Entry::Vacant(eintrag) => {
                let submitter = self.stream_anlegen(session, codec)?;
                eintrag.insert(submitter).value().clone()
            }
        };

        submitter.submit(daten, sequenz);
        Ok(())
    }

    /// Entfernt den Stream einer Session
    pub fn remove(&self, session: SessionId) -> AudioResult<bool> {
        if self.inner.submitter.remove(&session).is_none() {
            return Ok(false);
        }
        self.inner
            .sender
            .send(StreamEreignis::Entfernt(session))
            .map_err(|_| AudioError::KanalGeschlossen)?;
        tracing::info!(%session, "Stream entfernt");
        Ok(true)
    }

    /// Alle Sessions mit Stream
    pub fn sessions(&self) -> Vec<SessionId> {
        self.inner.submitter.iter().map(|e| *e.key()).collect()
    }

    /// Anzahl der Streams
    pub fn len(&self) -> usize {
        self.inner.submitter.len()
    }

    /// true wenn keine Streams existieren
    pub fn is_empty(&self) -> bool {
        self.inner.submitter.is_empty()
    }

    fn stream_anlegen(&self, session: SessionId, codec: CodecKind) -> AudioResult<PacketSubmitter> {
        let decoder = (self.inner.fabrik)(codec)?;
        let stream = SpeakerStream::new(session, codec, self.inner.config.clone(), decoder)?;
        let submitter = stream.submitter();
        self.inner
            .sender
            .send(StreamEreignis::Neu(stream))
            .map_err(|_| AudioError::KanalGeschlossen)?;
        tracing::info!(%session, %codec, "Stream angelegt");
        Ok(submitter)
    }
}

// ---------------------------------------------------------------------------
// SpeakerSet
// ---------------------------------------------------------------------------

/// Alle Streams auf dem Audio-Thread
pub struct SpeakerSet {
    empfaenger: Receiver<StreamEreignis>,
    streams: HashMap<SessionId, SpeakerStream>,
    sprechend: HashSet<SessionId>,
}

impl SpeakerSet {
    pub fn new(empfaenger: Receiver<StreamEreignis>) -> Self {
        Self {
            empfaenger,
            streams: HashMap::new(),
            sprechend: HashSet::new(),
        }
    }

    /// Uebernimmt neue und entfernte Streams aus dem Kanal
    pub fn ereignisse_anwenden(&mut self) -> Vec<SprecherEreignis> {
        let mut ereignisse = Vec::new();
        while let Ok(ereignis) = self.empfaenger.try_recv() {
            match ereignis {
                StreamEreignis::Neu(stream) => {
                    let session = stream.session();
                    if let Some(mut alt) = self.streams.insert(session, stream) {
                        alt.destroy();
                        if self.sprechend.remove(&session) {
                            ereignisse.push(SprecherEreignis::SprichtNicht { session });
                        }
                    }
                    ereignisse.push(SprecherEreignis::StreamAngelegt { session });
                }
                StreamEreignis::Entfernt(session) => {
                    if let Some(mut stream) = self.streams.remove(&session) {
                        stream.destroy();
                        if self.sprechend.remove(&session) {
                            ereignisse.push(SprecherEreignis::SprichtNicht { session });
                        }
                        ereignisse.push(SprecherEreignis::StreamEntfernt { session });
                    }
                }
            }
        }
        ereignisse
    }

    /// Fordert von jedem Stream `anzahl` Samples an
    ///
    /// Liefert Anlage, Entfernung und Sprechzustands-Wechsel.
    pub fn request_all(&mut self, anzahl: usize) -> Vec<SprecherEreignis> {
        let mut ereignisse = self.ereignisse_anwenden();
        for (&session, stream) in self.streams.iter_mut() {
            let spricht = stream.request_samples(anzahl);
            if spricht && self.sprechend.insert(session) {
                ereignisse.push(SprecherEreignis::Spricht { session });
            } else if !spricht && self.sprechend.remove(&session) {
                ereignisse.push(SprecherEreignis::SprichtNicht { session });
            }
        }
        ereignisse
    }

    pub fn stream(&self, session: SessionId) -> Option<&SpeakerStream> {
        self.streams.get(&session)
    }

    pub fn stream_mut(&mut self, session: SessionId) -> Option<&mut SpeakerStream> {
        self.streams.get_mut(&session)
    }

    /// Sessions, die im letzten Block gesprochen haben
    pub fn sprechende(&self) -> Vec<SessionId> {
        let mut sessions: Vec<_> = self.sprechend.iter().copied().collect();
        sessions.sort_by_key(|s| s.inner());
        sessions
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ZaehlDecoder(Arc<Mutex<u32>>);

    impl FrameDecoder for ZaehlDecoder {
        fn decode(&mut self, eingabe: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize> {
            *self.0.lock() += 1;
            let wert = if eingabe.is_some() { 0.5 } else { 0.0 };
            ausgabe[..480].fill(wert);
            Ok(480)
        }
    }

    fn registry() -> (SessionRegistry, SpeakerSet, Arc<Mutex<u32>>) {
        let aufrufe = Arc::new(Mutex::new(0));
        let zaehler = Arc::clone(&aufrufe);
        let fabrik: DecoderFabrik = Box::new(move |_codec| {
            Ok(Box::new(ZaehlDecoder(Arc::clone(&zaehler))) as Box<dyn FrameDecoder>)
        });
        let (registry, empfaenger) = SessionRegistry::new(EmpfangsConfig::default(), fabrik).unwrap();
        (registry, SpeakerSet::new(empfaenger), aufrufe)
    }

    const OPUS_PAKET: [u8; 4] = [0x80, 0x02, 0x00, 0xAA];

    #[test]
    fn erstes_paket_legt_stream_an() {
        let (registry, mut set, _) = registry();
        registry
            .packet_received(SessionId(7), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
            .unwrap();
        registry
            .packet_received(SessionId(7), CodecKind::Opus, &OPUS_PAKET, Sequenz(2))
            .unwrap();
        assert_eq!(registry.len(), 1);

        let ereignisse = set.request_all(480);
        assert_eq!(
            ereignisse,
            vec![
                SprecherEreignis::StreamAngelegt { session: SessionId(7) },
                SprecherEreignis::Spricht { session: SessionId(7) },
            ]
        );
        assert_eq!(set.stream(SessionId(7)).unwrap().statistik().pakete_angenommen, 2);
    }

    #[test]
    fn codec_wechsel_ersetzt_stream() {
        let (registry, mut set, _) = registry();
        registry
            .packet_received(SessionId(1), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
            .unwrap();
        registry
            .packet_received(SessionId(1), CodecKind::Speex, &[0x40, 0x01, 9], Sequenz(2))
            .unwrap();
        assert_eq!(registry.len(), 1);

        set.ereignisse_anwenden();
        assert_eq!(set.len(), 1);
        assert_eq!(set.stream(SessionId(1)).unwrap().codec(), CodecKind::Speex);
    }

    #[test]
    fn ersetzter_stream_meldet_sprechzustand_neu() {
        let (registry, mut set, _) = registry();
        registry
            .packet_received(SessionId(5), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
            .unwrap();
        set.request_all(480);
        assert_eq!(set.sprechende(), vec![SessionId(5)]);

        registry
            .packet_received(SessionId(5), CodecKind::Speex, &[0x40, 0x01, 9], Sequenz(2))
            .unwrap();
        let ereignisse = set.request_all(480);
        assert_eq!(
            ereignisse,
            vec![
                SprecherEreignis::SprichtNicht { session: SessionId(5) },
                SprecherEreignis::StreamAngelegt { session: SessionId(5) },
                SprecherEreignis::Spricht { session: SessionId(5) },
            ]
        );
        assert_eq!(set.sprechende(), vec![SessionId(5)]);
    }

    #[test]
    fn entfernen_zerstoert_stream_auf_audio_thread() {
        let (registry, mut set, _) = registry();
        registry
            .packet_received(SessionId(2), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
            .unwrap();
        set.request_all(480);

        assert!(registry.remove(SessionId(2)).unwrap());
        assert!(!registry.remove(SessionId(2)).unwrap());
        assert!(registry.is_empty());

        let ereignisse = set.ereignisse_anwenden();
        assert_eq!(
            ereignisse,
            vec![
                SprecherEreignis::SprichtNicht { session: SessionId(2) },
                SprecherEreignis::StreamEntfernt { session: SessionId(2) },
            ]
        );
        assert!(set.is_empty());
    }

    #[test]
    fn verstummen_wird_gemeldet() {
        let (registry, mut set, aufrufe) = registry();
        registry
            .packet_received(SessionId(4), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
            .unwrap();

        let mut ereignisse = Vec::new();
        for _ in 0..20 {
            ereignisse.extend(set.request_all(480));
        }
        assert_eq!(
            ereignisse.last(),
            Some(&SprecherEreignis::SprichtNicht { session: SessionId(4) })
        );
        assert!(set.sprechende().is_empty());
        // 1 Paket + 11 Verdeckungen, danach nur noch Stille
        assert_eq!(*aufrufe.lock(), 12);
    }

    #[test]
    fn mehrere_sprecher_unabhaengig() {
        let (registry, mut set, _) = registry();
        for session in 1..=3 {
            registry
                .packet_received(SessionId(session), CodecKind::Opus, &OPUS_PAKET, Sequenz(1))
                .unwrap();
        }
        set.request_all(480);

        assert_eq!(set.sprechende(), vec![SessionId(1), SessionId(2), SessionId(3)]);
        for session in 1..=3 {
            let stream = set.stream(SessionId(session)).unwrap();
            assert!(stream.samples()[..480].iter().all(|&s| s == 0.5));
        }
    }

    #[test]
    fn fabrik_fehler_wird_durchgereicht() {
        let fabrik: DecoderFabrik =
            Box::new(|codec| Err(AudioError::CodecFehler(format!("{} nicht verfuegbar", codec))));
        let (registry, _empfaenger) = SessionRegistry::new(EmpfangsConfig::default(), fabrik).unwrap();
        let err = registry
            .packet_received(SessionId(1), CodecKind::CeltBeta, &[0x60, 0x01, 1], Sequenz(1))
            .unwrap_err();
        assert!(matches!(err, AudioError::CodecFehler(_)));
        assert!(registry.is_empty());
    }
}
