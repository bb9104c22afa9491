//! Empfangs-Stream pro Sprecher
//!
//! Ein [`SpeakerStream`] besitzt genau einen Decoder und einen Jitter
//! Buffer. Der Netzwerk-Thread liefert Pakete ueber einen
//! [`PacketSubmitter`] ein, der Audio-Thread holt mit
//! [`SpeakerStream::request_samples`] dekodiertes PCM ab.
//!
//! ## Threading
//! - Einziger geteilter, veraenderlicher Zustand ist der Jitter Buffer
//!   (hinter einem `parking_lot::Mutex`).
//! - PCM-Puffer, Subframe-Queue und Zaehler gehoeren dem Audio-Thread.
//! - `request_samples` wartet nie auf Netzwerkdaten: bei Unterlauf wird
//!   sofort Stille oder Decoder-Verdeckung erzeugt.
//!
//! ## Sprechzustand
//! Der Rueckgabewert von `request_samples` beschreibt den Block, der mit dem
//! *vorherigen* Aufruf ausgeliefert wurde. Ein Terminator-Paket wird also
//! erst einen Aufruf spaeter als `false` sichtbar, eine Wiederbelebung durch
//! neue Pakete ebenso erst einen Aufruf spaeter als `true`.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use sprechfunk_core::{Sequenz, SessionId};
use sprechfunk_protocol::{paket_zerlegen, CodecKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use crate::codec::FrameDecoder;
use crate::config::EmpfangsConfig;
use crate::error::AudioResult;
use crate::jitter_buffer::{
    AdaptiveJitterBuffer, DelayHinweis, JitterBuffer, JitterBufferConfig, JitterPaket,
};

type GeteilterJitterBuffer = Arc<Mutex<Box<dyn JitterBuffer>>>;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken eines Streams (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatistik {
    /// In den Jitter Buffer eingefuegte Pakete
    pub pakete_angenommen: u64,
    /// Pakete, deren Grammatik ueber das Datenende hinauslief
    pub pakete_fehlerhaft: u64,
    /// Opus-Pakete mit Frames, die kein Vielfaches des Basis-Frames sind
    pub opus_framing_verworfen: u64,
    /// Mit echten Daten dekodierte Subframes
    pub frames_dekodiert: u64,
    /// Vom Decoder verdeckte Ticks (Decode ohne Eingabe)
    pub frames_verdeckt: u64,
    /// Stille-Ticks eines verstummten Streams
    pub stille_ticks: u64,
    /// Stille-Ticks zur Ueberbrueckung kurzer Unterlaeufe
    pub burst_stille_ticks: u64,
    /// Fehlgeschlagene Abrufe aus dem Jitter Buffer
    pub fehlgriffe: u64,
    /// Uebergaenge von sprechend zu verstummt
    pub sprechende_beendet: u64,
    /// Fehler des Decoders (durch Stille ersetzt)
    pub decoder_fehler: u64,
}

/// Vom Netzwerk-Thread beschriebene Zaehler
#[derive(Debug, Default)]
struct ProduzentenZustand {
    angenommen: AtomicU64,
    fehlerhaft: AtomicU64,
    opus_framing: AtomicU64,
    /// Neues Paket seit dem letzten `request_samples`
    neue_daten: AtomicBool,
}

// ---------------------------------------------------------------------------
// PacketSubmitter
// ---------------------------------------------------------------------------

/// Einlieferungsseite eines Streams fuer den Netzwerk-Thread
///
/// Haelt den Jitter Buffer nur schwach; nach `destroy` des Streams sind
/// alle Einlieferungen wirkungslos.
#[derive(Clone)]
pub struct PacketSubmitter {
    session: SessionId,
    codec: CodecKind,
    frame_size: u32,
    jitter: Weak<Mutex<Box<dyn JitterBuffer>>>,
    zustand: Arc<ProduzentenZustand>,
}

impl PacketSubmitter {
    /// Liefert ein empfangenes Paket ein
    ///
    /// Zu kurze oder fehlerhafte Pakete werden still verworfen.
    pub fn submit(&self, daten: &[u8], sequenz: Sequenz) {
        if daten.len() < 2 {
            trace!(session = %self.session, laenge = daten.len(), "Paket zu kurz, ignoriert");
            return;
        }

        let zerlegt = match paket_zerlegen(self.codec, daten, self.frame_size) {
            Ok(z) => z,
            Err(e) => {
                self.zustand.fehlerhaft.fetch_add(1, Ordering::Relaxed);
                trace!(session = %self.session, %sequenz, fehler = %e, "Fehlerhaftes Paket verworfen");
                return;
            }
        };

        if let Some(pro_frame) = zerlegt.opus_samples_pro_frame {
            if pro_frame % self.frame_size != 0 {
                self.zustand.opus_framing.fetch_add(1, Ordering::Relaxed);
                trace!(
                    session = %self.session,
                    %sequenz,
                    pro_frame,
                    "Opus-Frame ist kein Vielfaches des Basis-Frames, verworfen"
                );
                return;
            }
        }

        let Some(jitter) = self.jitter.upgrade() else {
            trace!(session = %self.session, "Stream zerstoert, Paket ignoriert");
            return;
        };

        let paket = JitterPaket {
            daten: Bytes::copy_from_slice(daten),
            zeitstempel: sequenz.zeitstempel(self.frame_size),
            span: zerlegt.samples,
        };
        jitter.lock().put(paket);

        self.zustand.angenommen.fetch_add(1, Ordering::Relaxed);
        self.zustand.neue_daten.store(true, Ordering::Release);
    }

    /// Session des zugehoerigen Streams
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Codec des zugehoerigen Streams
    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// true solange der Stream nicht zerstoert wurde
    pub fn ist_aktiv(&self) -> bool {
        self.jitter.strong_count() > 0
    }
}

// ---------------------------------------------------------------------------
// SpeakerStream
// ---------------------------------------------------------------------------

/// Dekodier-Stream eines entfernten Sprechers
pub struct SpeakerStream {
    session: SessionId,
    codec: CodecKind,
    config: EmpfangsConfig,
    frame_size: usize,
    /// Samples, die ein Decode-Aufruf hoechstens erzeugt
    chunk: usize,

    jitter: Option<GeteilterJitterBuffer>,
    decoder: Option<Box<dyn FrameDecoder>>,
    zustand: Arc<ProduzentenZustand>,

    puffer: Vec<f32>,
    gefuellt: usize,
    letzter_verbrauch: usize,

    subframes: VecDeque<Bytes>,
    terminator: bool,
    lebendig: bool,
    /// Ticks mit weniger verfuegbaren Paketen als im Mittel
    weiche_fehlgriffe: u32,
    /// Fehlgeschlagene Abrufe in Folge
    harte_fehlgriffe: u32,
    durchschnitt_verfuegbar: f32,
    statistik: StreamStatistik,
}

impl SpeakerStream {
    /// Erstellt einen Stream mit dem Standard-Jitter-Buffer
    pub fn new(
        session: SessionId,
        codec: CodecKind,
        config: EmpfangsConfig,
        decoder: Box<dyn FrameDecoder>,
    ) -> AudioResult<Self> {
        let jitter = AdaptiveJitterBuffer::neu(JitterBufferConfig::aus_empfang(&config));
        Self::mit_jitter_buffer(session, codec, config, decoder, Box::new(jitter))
    }

    /// Erstellt einen Stream mit einem beliebigen Jitter Buffer
    pub fn mit_jitter_buffer(
        session: SessionId,
        codec: CodecKind,
        config: EmpfangsConfig,
        decoder: Box<dyn FrameDecoder>,
        jitter: Box<dyn JitterBuffer>,
    ) -> AudioResult<Self> {
        config.validieren()?;

        let frame_size = config.frame_size as usize;
        let chunk = frame_size * codec.decode_basis_frames() as usize;

        debug!(%session, %codec, chunk, "Empfangs-Stream angelegt");

        Ok(Self {
            session,
            codec,
            config,
            frame_size,
            chunk,
            jitter: Some(Arc::new(Mutex::new(jitter))),
            decoder: Some(decoder),
            zustand: Arc::new(ProduzentenZustand::default()),
            puffer: vec![0.0; chunk],
            gefuellt: 0,
            letzter_verbrauch: 0,
            subframes: VecDeque::new(),
            terminator: false,
            lebendig: true,
            weiche_fehlgriffe: 0,
            harte_fehlgriffe: 0,
            durchschnitt_verfuegbar: 0.0,
            statistik: StreamStatistik::default(),
        })
    }

    /// Einlieferungsseite fuer den Netzwerk-Thread
    pub fn submitter(&self) -> PacketSubmitter {
        PacketSubmitter {
            session: self.session,
            codec: self.codec,
            frame_size: self.config.frame_size,
            jitter: self.jitter.as_ref().map(Arc::downgrade).unwrap_or_default(),
            zustand: Arc::clone(&self.zustand),
        }
    }

    /// Liefert ein Paket direkt ein (wie [`PacketSubmitter::submit`])
    pub fn submit(&self, daten: &[u8], sequenz: Sequenz) {
        self.submitter().submit(daten, sequenz);
    }

    /// Stellt sicher, dass mindestens `anzahl` Samples bereitliegen
    ///
    /// Die Samples stehen danach in [`samples`](Self::samples). Beim naechsten
    /// Aufruf gelten genau `anzahl` Samples als verbraucht. Rueckgabe: ob der
    /// zuvor ausgelieferte Block Sprache war.
    pub fn request_samples(&mut self, anzahl: usize) -> bool {
        let verbraucht = self.letzter_verbrauch.min(self.gefuellt);
        self.puffer.copy_within(verbraucht..self.gefuellt, 0);
        self.gefuellt -= verbraucht;
        self.letzter_verbrauch = anzahl;

        let neue_daten = self.zustand.neue_daten.swap(false, Ordering::Acquire);

        let Some(jitter) = self.jitter.clone() else {
            // Zerstoerter Stream liefert nur noch Stille
            self.puffer_wachsen(anzahl);
            self.puffer[self.gefuellt..anzahl.max(self.gefuellt)].fill(0.0);
            self.gefuellt = self.gefuellt.max(anzahl);
            return false;
        };

        // Gemeldet wird der Zustand vor diesem Aufruf, auch bei Wiederbelebung
        let gemeldet = self.lebendig;
        if neue_daten && !self.lebendig {
            self.wiederbeleben(&jitter);
        }

        if self.gefuellt >= anzahl {
            return gemeldet;
        }

        let mut naechst_lebendig = self.lebendig;

        while self.gefuellt < anzahl {
            self.puffer_wachsen(self.gefuellt + self.chunk);

            if !self.lebendig {
                self.stille(self.frame_size);
                self.statistik.stille_ticks += 1;
                continue;
            }

            let (zeitstempel, verfuegbar) = {
                let jb = jitter.lock();
                (jb.current_timestamp(), jb.available_count())
            };

            if zeitstempel != 0 && (verfuegbar as f32) < self.durchschnitt_verfuegbar.floor() {
                self.weiche_fehlgriffe += 1;
                if self.weiche_fehlgriffe < self.config.burst_toleranz {
                    trace!(session = %self.session, verfuegbar, "Kurzer Unterlauf, Stille");
                    self.stille(self.frame_size);
                    self.statistik.burst_stille_ticks += 1;
                    jitter.lock().tick();
                    continue;
                }
            } else {
                self.weiche_fehlgriffe = 0;
            }

            if self.subframes.is_empty() {
                let paket = jitter.lock().get();
                match paket {
                    Some(paket) => {
                        self.weiche_fehlgriffe = 0;
                        self.harte_fehlgriffe = 0;
                        let gewicht = self.config.durchschnitt_gewicht;
                        self.durchschnitt_verfuegbar =
                            self.durchschnitt_verfuegbar * (1.0 - gewicht) + verfuegbar as f32 * gewicht;
                        self.paket_aufteilen(&paket.daten);
                        // Paket ohne Subframes, nur Ende-Markierung
                        if self.subframes.is_empty() && self.terminator {
                            naechst_lebendig = false;
                        }
                    }
                    None => {
                        let anpassung = jitter.lock().update_delay(DelayHinweis::Verlust);
                        trace!(session = %self.session, ?anpassung, "Kein Paket verfuegbar");
                        self.statistik.fehlgriffe += 1;
                        self.harte_fehlgriffe += 1;
                        if self.harte_fehlgriffe > self.config.max_fehlversuche {
                            naechst_lebendig = false;
                        }
                    }
                }
            }

            let dekodiert = match self.subframes.pop_front() {
                Some(subframe) => {
                    let eingabe = (!subframe.is_empty()).then_some(&subframe[..]);
                    let n = self.dekodieren(eingabe);
                    self.statistik.frames_dekodiert += 1;
                    if self.subframes.is_empty() {
                        jitter.lock().update_delay(DelayHinweis::FensterEnde);
                        if self.terminator {
                            naechst_lebendig = false;
                        }
                    }
                    n
                }
                None => {
                    self.statistik.frames_verdeckt += 1;
                    self.dekodieren(None)
                }
            };

            {
                let mut jb = jitter.lock();
                for _ in 0..dekodiert / self.frame_size {
                    jb.tick();
                }
            }
            self.gefuellt += dekodiert;
        }

        if self.lebendig && !naechst_lebendig {
            self.statistik.sprechende_beendet += 1;
            debug!(session = %self.session, "Sprecher verstummt");
        }
        self.lebendig = naechst_lebendig;
        gemeldet
    }

    /// Bereitstehende Samples (mindestens die zuletzt angeforderte Anzahl)
    pub fn samples(&self) -> &[f32] {
        &self.puffer[..self.gefuellt]
    }

    /// Aktuelle Kapazitaet des PCM-Puffers in Samples
    pub fn kapazitaet(&self) -> usize {
        self.puffer.len()
    }

    /// Session des Sprechers
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Codec des Streams
    pub fn codec(&self) -> CodecKind {
        self.codec
    }

    /// Sprechzustand, der beim naechsten `request_samples` gemeldet wird
    pub fn ist_lebendig(&self) -> bool {
        self.lebendig
    }

    /// true nach [`destroy`](Self::destroy)
    pub fn ist_zerstoert(&self) -> bool {
        self.jitter.is_none()
    }

    /// Statistiken des Streams
    pub fn statistik(&self) -> StreamStatistik {
        StreamStatistik {
            pakete_angenommen: self.zustand.angenommen.load(Ordering::Relaxed),
            pakete_fehlerhaft: self.zustand.fehlerhaft.load(Ordering::Relaxed),
            opus_framing_verworfen: self.zustand.opus_framing.load(Ordering::Relaxed),
            ..self.statistik.clone()
        }
    }

    /// Gibt Decoder, Jitter Buffer und Puffer frei (in dieser Reihenfolge)
    ///
    /// Wiederholte Aufrufe sind wirkungslos. Darf nicht parallel zu
    /// `request_samples` laufen; Einlieferungen sind dagegen unkritisch.
    pub fn destroy(&mut self) {
        let mut freigegeben = false;
        if let Some(mut decoder) = self.decoder.take() {
            decoder.destroy();
            freigegeben = true;
        }
        if let Some(jitter) = self.jitter.take() {
            jitter.lock().reset();
            freigegeben = true;
        }
        self.puffer = Vec::new();
        self.gefuellt = 0;
        self.letzter_verbrauch = 0;
        self.subframes.clear();
        self.lebendig = false;
        if freigegeben {
            debug!(session = %self.session, "Empfangs-Stream freigegeben");
        }
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn puffer_wachsen(&mut self, groesse: usize) {
        if groesse > self.puffer.len() {
            self.puffer.resize(groesse, 0.0);
        }
    }

    fn stille(&mut self, samples: usize) {
        self.puffer[self.gefuellt..self.gefuellt + samples].fill(0.0);
        self.gefuellt += samples;
    }

    fn wiederbeleben(&mut self, jitter: &GeteilterJitterBuffer) {
        jitter.lock().resync();
        self.lebendig = true;
        self.weiche_fehlgriffe = 0;
        self.harte_fehlgriffe = 0;
        self.terminator = false;
        self.subframes.clear();
        debug!(session = %self.session, "Sprecher aktiv");
    }

    /// Zerlegt ein Paket aus dem Jitter Buffer in Subframes
    fn paket_aufteilen(&mut self, daten: &Bytes) {
        match paket_zerlegen(self.codec, daten, self.config.frame_size) {
            Ok(zerlegt) => {
                self.terminator = zerlegt.terminator;
                self.subframes
                    .extend(zerlegt.subframes.into_iter().map(|s| daten.slice_ref(s)));
            }
            Err(e) => {
                // Wurde bei der Einlieferung geprueft, tritt hier praktisch nicht auf
                warn!(session = %self.session, fehler = %e, "Gepuffertes Paket nicht lesbar");
                self.terminator = false;
            }
        }
    }

    /// Dekodiert an das Pufferende und liefert die Anzahl erzeugter Samples
    ///
    /// Decoder-Fehler werden durch einen Basis-Frame Stille ersetzt.
    fn dekodieren(&mut self, eingabe: Option<&[u8]>) -> usize {
        let start = self.gefuellt;
        let ziel = &mut self.puffer[start..start + self.chunk];

        let ergebnis = match self.decoder.as_mut() {
            Some(decoder) => decoder.decode(eingabe, ziel),
            None => Ok(0),
        };

        let n = match ergebnis {
            Ok(n) => n.min(self.chunk),
            Err(e) => {
                self.statistik.decoder_fehler += 1;
                warn!(session = %self.session, fehler = %e, "Dekodierung fehlgeschlagen");
                0
            }
        };

        // Mindestens ein Basis-Frame pro Tick
        let n = if n < self.frame_size {
            self.puffer[start + n..start + self.frame_size].fill(0.0);
            self.frame_size
        } else {
            n
        };

        if let Some(faktor) = self.codec.pcm_skalierung() {
            for s in &mut self.puffer[start..start + n] {
                *s *= faktor;
            }
        }
        n
    }
}

impl Drop for SpeakerStream {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for SpeakerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerStream")
            .field("session", &self.session)
            .field("codec", &self.codec)
            .field("lebendig", &self.lebendig)
            .field("gefuellt", &self.gefuellt)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
