//! sprechfunk-sim – Bibliotheks-Root
//!
//! Simuliert mehrere Opus-Sprecher, deren Pakete ueber ein Netz mit fester
//! Latenz, periodischem Jitter und periodischem Verlust beim Empfaenger
//! ankommen. Der Ablauf ist deterministisch: pro Audio-Block senden alle
//! Sprecher, das Netz stellt faellige Pakete zu und das [`SpeakerSet`]
//! fordert einen Block Samples an.

pub mod config;

use anyhow::Result;
use serde::Serialize;
use sprechfunk_audio::{
    AudioError, DecoderFabrik, FrameDecoder, FrameEncoder, OpusFrameDecoder, OpusFrameEncoder,
    SessionRegistry, SpeakerSet, StreamStatistik,
};
use sprechfunk_core::{SprecherEreignis, Sequenz, SessionId};
use sprechfunk_protocol::{opus_paket_schreiben, CodecKind, PacketWriter};
use std::collections::BTreeMap;

use config::{NetzEinstellungen, SimConfig, SPRECHER_VERSATZ};

// ---------------------------------------------------------------------------
// Bericht
// ---------------------------------------------------------------------------

/// Ergebnis eines Simulationslaufs
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimBericht {
    pub bloecke: u64,
    pub sprecher: Vec<SprecherBericht>,
    /// Maximaler Pegel ueber alle Streams
    pub spitzenpegel: f32,
}

/// Ergebnis eines einzelnen Sprechers
#[derive(Debug, Clone, Default, Serialize)]
pub struct SprecherBericht {
    pub session: SessionId,
    pub gesendet: u64,
    pub im_netz_verloren: u64,
    pub sprechvorgaenge_erkannt: u64,
    pub sprech_bloecke: u64,
    pub statistik: StreamStatistik,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Ein Opus-Sprecher mit Sinuston
struct SimSprecher {
    session: SessionId,
    encoder: OpusFrameEncoder,
    frequenz: f32,
    start: u64,
    pakete: u64,
    periode: u64,
    phasen: u64,
    sequenz: Sequenz,
    gesendet: u64,
}

impl SimSprecher {
    fn neu(index: u32, config: &SimConfig) -> Result<Self> {
        let netz = &config.netz;
        Ok(Self {
            session: SessionId(index + 1),
            encoder: OpusFrameEncoder::new(config.packetizer.bitrate)?,
            frequenz: 220.0 * (index + 1) as f32,
            start: index as u64 * SPRECHER_VERSATZ,
            pakete: netz.pakete as u64,
            periode: (netz.pakete + netz.pause_bloecke) as u64,
            phasen: netz.sprechphasen as u64,
            sequenz: Sequenz(0),
            gesendet: 0,
        })
    }

    /// Kodiert den Frame fuer `block`, falls der Sprecher gerade spricht
    fn senden(&mut self, block: u64) -> Result<Option<NetzPaket>> {
        let Some(relativ) = block.checked_sub(self.start) else {
            return Ok(None);
        };
        let phase = relativ / self.periode;
        let position = relativ % self.periode;
        if phase >= self.phasen || position >= self.pakete {
            return Ok(None);
        }

        let n = self.encoder.frame_size();
        let pcm: Vec<f32> = (0..n)
            .map(|i| {
                let t = (relativ as usize * n + i) as f32 / sprechfunk_protocol::SAMPLE_RATE as f32;
                (t * self.frequenz * std::f32::consts::TAU).sin() * 0.3
            })
            .collect();

        let mut nutzlast = [0u8; 512];
        let laenge = self.encoder.encode(&pcm, &mut nutzlast)?;

        let mut writer = PacketWriter::with_capacity(laenge + 3);
        let terminator = position + 1 == self.pakete;
        opus_paket_schreiben(&mut writer, CodecKind::Opus.udp_typ(), &nutzlast[..laenge], terminator)?;

        self.sequenz = self.sequenz.naechste();
        self.gesendet += 1;
        Ok(Some(NetzPaket {
            session: self.session,
            sequenz: self.sequenz,
            daten: writer.as_slice().to_vec(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Netz
// ---------------------------------------------------------------------------

struct NetzPaket {
    session: SessionId,
    sequenz: Sequenz,
    daten: Vec<u8>,
}

/// Deterministisches Netz: Latenz, periodischer Jitter, periodischer Verlust
struct SimNetz {
    einstellungen: NetzEinstellungen,
    /// Faelligkeits-Block -> Pakete in Sendereihenfolge
    unterwegs: BTreeMap<u64, Vec<NetzPaket>>,
    verloren: BTreeMap<SessionId, u64>,
}

impl SimNetz {
    fn neu(einstellungen: NetzEinstellungen) -> Self {
        Self {
            einstellungen,
            unterwegs: BTreeMap::new(),
            verloren: BTreeMap::new(),
        }
    }

    fn senden(&mut self, block: u64, paket: NetzPaket) {
        let e = &self.einstellungen;
        let seq = paket.sequenz.0;
        if e.verlust_jedes_n > 0 && seq % e.verlust_jedes_n as u64 == 0 {
            *self.verloren.entry(paket.session).or_default() += 1;
            tracing::trace!(session = %paket.session, sequenz = %paket.sequenz, "Paket im Netz verloren");
            return;
        }
        let mut faellig = block + e.latenz_bloecke as u64;
        if e.jitter_jedes_n > 0 && seq % e.jitter_jedes_n as u64 == 0 {
            faellig += e.jitter_bloecke as u64;
        }
        self.unterwegs.entry(faellig).or_default().push(paket);
    }

    fn zustellen(&mut self, block: u64) -> Vec<NetzPaket> {
        let spaeter = self.unterwegs.split_off(&(block + 1));
        let faellig = std::mem::replace(&mut self.unterwegs, spaeter);
        faellig.into_values().flatten().collect()
    }

    fn verloren(&self, session: SessionId) -> u64 {
        self.verloren.get(&session).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Ablauf
// ---------------------------------------------------------------------------

/// Decoder-Fabrik des Simulators (nur Opus)
pub fn opus_fabrik() -> DecoderFabrik {
    Box::new(|codec| match codec {
        CodecKind::Opus => Ok(Box::new(OpusFrameDecoder::new()?) as Box<dyn FrameDecoder>),
        andere => Err(AudioError::CodecFehler(format!(
            "Kein Decoder fuer {} verfuegbar",
            andere
        ))),
    })
}

/// Fuehrt die Simulation vollstaendig aus
pub fn simulation_ausfuehren(config: &SimConfig) -> Result<SimBericht> {
    config.validieren()?;

    let (registry, empfaenger) = SessionRegistry::new(config.empfang.clone(), opus_fabrik())?;
    let mut set = SpeakerSet::new(empfaenger);
    let mut netz = SimNetz::neu(config.netz.clone());
    let mut sprecher = (0..config.netz.sprecher)
        .map(|i| SimSprecher::neu(i, config))
        .collect::<Result<Vec<_>>>()?;

    let block_groesse = config.empfang.frame_size as usize;
    let bloecke = config.bloecke_gesamt();
    let mut berichte: BTreeMap<SessionId, SprecherBericht> = BTreeMap::new();
    let mut spitzenpegel = 0.0f32;

    tracing::info!(
        sprecher = config.netz.sprecher,
        bloecke,
        "Simulation startet"
    );

    for block in 0..bloecke {
        for s in &mut sprecher {
            if let Some(paket) = s.senden(block)? {
                netz.senden(block, paket);
            }
        }

        for paket in netz.zustellen(block) {
            registry.packet_received(paket.session, CodecKind::Opus, &paket.daten, paket.sequenz)?;
        }

        for ereignis in set.request_all(block_groesse) {
            let bericht = berichte.entry(ereignis.session()).or_insert_with(|| SprecherBericht {
                session: ereignis.session(),
                ..Default::default()
            });
            match ereignis {
                SprecherEreignis::Spricht { session } => {
                    bericht.sprechvorgaenge_erkannt += 1;
                    tracing::debug!(%session, block, "Sprecher aktiv");
                }
                SprecherEreignis::SprichtNicht { session } => {
                    tracing::debug!(%session, block, "Sprecher verstummt");
                }
                SprecherEreignis::StreamAngelegt { session } => {
                    tracing::info!(%session, block, "Stream angelegt");
                }
                SprecherEreignis::StreamEntfernt { session } => {
                    tracing::info!(%session, block, "Stream entfernt");
                }
            }
        }

        for session in set.sprechende() {
            if let Some(bericht) = berichte.get_mut(&session) {
                bericht.sprech_bloecke += 1;
            }
            if let Some(stream) = set.stream(session) {
                spitzenpegel = stream.samples()[..block_groesse]
                    .iter()
                    .fold(spitzenpegel, |m, s| m.max(s.abs()));
            }
        }
    }

    for s in &sprecher {
        let bericht = berichte.entry(s.session).or_insert_with(|| SprecherBericht {
            session: s.session,
            ..Default::default()
        });
        bericht.gesendet = s.gesendet;
        bericht.im_netz_verloren = netz.verloren(s.session);
        if let Some(stream) = set.stream(s.session) {
            bericht.statistik = stream.statistik();
        }
        registry.remove(s.session)?;
    }
    set.ereignisse_anwenden();

    let bericht = SimBericht {
        bloecke,
        sprecher: berichte.into_values().collect(),
        spitzenpegel,
    };
    tracing::info!(
        bloecke,
        spitzenpegel = bericht.spitzenpegel,
        "Simulation beendet"
    );
    Ok(bericht)
}
