//! Adaptiver Jitter Buffer fuer Voice-Pakete
//!
//! Nimmt Pakete in beliebiger Reihenfolge an (Zeitstempel in Samples) und
//! gibt sie in Zeitstempel-Reihenfolge wieder heraus. Die Wiedergabeuhr
//! (`zeiger`) wird durch `get` vorgeschoben: bei einem Treffer auf das Ende
//! des Pakets, bei einem Fehlgriff um einen Basis-Frame. `tick` markiert den
//! bis dahin abgespielten Stand; spaeter eintreffende Pakete davor gelten
//! als verspaetet.
//!
//! ## Verzoegerungs-Anpassung
//! - Nach einem Fehlgriff mit kuerzlich verspaeteten Paketen wird der Zeiger
//!   um einen Basis-Frame zurueckgesetzt (eine Verdeckung mehr, hoehere
//!   Latenz), hoechstens bis zur konfigurierten Margin.
//! - Am Ende eines Dekodierfensters wird hinzugefuegte Verzoegerung wieder
//!   abgebaut, wenn alle Pakete im Messfenster mindestens zwei Basis-Frames
//!   zu frueh eintrafen.
//!
//! ## Performance-Eigenschaften
//! - O(log n) Einfuegen (BTreeMap nach Zeitstempel sortiert)
//! - O(log n) Entnahme des aeltesten Pakets
//! - Nicht thread-safe; der Stream schuetzt ihn mit einem Mutex

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};

use crate::config::EmpfangsConfig;

// ---------------------------------------------------------------------------
// Schnittstelle
// ---------------------------------------------------------------------------

/// Ein gepuffertes Voice-Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterPaket {
    /// Rohes Paket inklusive Flags-Byte
    pub daten: Bytes,
    /// Zeitstempel in Samples (`frame_size * sequenz`)
    pub zeitstempel: u64,
    /// Vom Paket abgedeckte Samples
    pub span: u32,
}

/// Anlass einer Verzoegerungs-Aktualisierung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayHinweis {
    /// Abruf ist fehlgeschlagen
    Verlust,
    /// Letzter Subframe eines Pakets wurde dekodiert
    FensterEnde,
}

/// Ergebnis einer Verzoegerungs-Aktualisierung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayAnpassung {
    Keine,
    Erhoeht,
    Verringert,
}

/// Faehigkeiten, die der Decode-Scheduler von einem Jitter Buffer benoetigt
pub trait JitterBuffer: Send {
    /// Fuegt ein Paket ein (verspaetete Pakete und Duplikate werden verworfen)
    fn put(&mut self, paket: JitterPaket);

    /// Entnimmt das Paket fuer den aktuellen Zeitstempel
    fn get(&mut self) -> Option<JitterPaket>;

    /// Markiert einen abgespielten Basis-Frame
    fn tick(&mut self);

    /// Aktueller Wiedergabe-Zeitstempel, 0 solange die Uhr nicht laeuft
    fn current_timestamp(&self) -> u64;

    /// Anzahl gepufferter Pakete ab dem aktuellen Zeitstempel
    fn available_count(&self) -> usize;

    /// Passt die Verzoegerung an
    fn update_delay(&mut self, hinweis: DelayHinweis) -> DelayAnpassung;

    /// Startet die Wiedergabeuhr beim aeltesten gepufferten Paket neu
    fn resync(&mut self);

    /// Verwirft alle Pakete und setzt die Uhr zurueck
    fn reset(&mut self);
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Samples pro Basis-Frame (Tick)
    pub frame_size: u32,
    /// Maximale Zusatz-Verzoegerung in Samples
    pub margin: u64,
    /// Maximale Anzahl gepufferter Pakete
    pub max_pakete: usize,
    /// Fenstergroesse fuer die Ankunftsreserve (letzte N Pakete)
    pub headroom_fenster: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self::aus_empfang(&EmpfangsConfig::default())
    }
}

impl JitterBufferConfig {
    /// Leitet die Jitter-Buffer-Konfiguration aus der Stream-Konfiguration ab
    pub fn aus_empfang(config: &EmpfangsConfig) -> Self {
        Self {
            frame_size: config.frame_size,
            margin: config.jitter_margin_samples(),
            max_pakete: config.jitter_max_pakete,
            headroom_fenster: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStatistik {
    /// Anzahl empfangener Pakete gesamt
    pub empfangen: u64,
    /// Anzahl ausgelieferter Pakete
    pub abgespielt: u64,
    /// Anzahl verworfener Duplikate
    pub duplikate: u64,
    /// Pakete, die erst nach ihrem Abspielzeitpunkt eintrafen
    pub verspaetet: u64,
    /// Pakete, die uebersprungen oder beim Ueberlauf verdraengt wurden
    pub verloren: u64,
    /// Abrufe ohne passendes Paket
    pub fehlgriffe: u64,
    /// Anzahl Ticks
    pub ticks: u64,
    /// Anzahl Verzoegerungs-Erhoehungen
    pub verzoegerung_erhoeht: u64,
    /// Anzahl Verzoegerungs-Verringerungen
    pub verzoegerung_verringert: u64,
    /// Aktueller Fuellstand in Paketen
    pub fuellstand: usize,
    /// Aktuelle Zusatz-Verzoegerung in Samples
    pub zusatz_verzoegerung: u64,
}

// ---------------------------------------------------------------------------
// AdaptiveJitterBuffer
// ---------------------------------------------------------------------------

/// Adaptiver Jitter Buffer – puffert und sortiert Voice-Pakete
pub struct AdaptiveJitterBuffer {
    config: JitterBufferConfig,
    /// Gepufferte Pakete, sortiert nach Zeitstempel
    pakete: BTreeMap<u64, JitterPaket>,
    /// Wiedergabeuhr (None bis zum ersten erfolgreichen Start)
    zeiger: Option<u64>,
    /// Stand beim letzten Tick
    abgespielt_bis: Option<u64>,
    /// Ankunftsreserven (Zeitstempel minus Zeiger) der letzten Pakete
    headroom: VecDeque<i64>,
    /// Seit der letzten Anpassung ist ein Paket zu spaet gekommen
    verspaetung_gesehen: bool,
    /// Hinzugefuegte Verzoegerung in Samples
    zusatz: u64,
    statistik: JitterBufferStatistik,
}

impl AdaptiveJitterBuffer {
    /// Erstellt einen neuen Jitter Buffer mit gegebener Konfiguration
    pub fn neu(config: JitterBufferConfig) -> Self {
        let fenster = config.headroom_fenster;
        Self {
            config,
            pakete: BTreeMap::new(),
            zeiger: None,
            abgespielt_bis: None,
            headroom: VecDeque::with_capacity(fenster),
            verspaetung_gesehen: false,
            zusatz: 0,
            statistik: JitterBufferStatistik::default(),
        }
    }

    /// Erstellt einen Buffer mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(JitterBufferConfig::default())
    }

    /// Gibt eine Referenz auf die aktuellen Statistiken
    pub fn statistik(&self) -> &JitterBufferStatistik {
        &self.statistik
    }

    /// Gibt den aktuellen Fuellstand zurueck
    pub fn fuellstand(&self) -> usize {
        self.pakete.len()
    }

    fn frame(&self) -> u64 {
        self.config.frame_size as u64
    }

    fn headroom_merken(&mut self, wert: i64) {
        if self.headroom.len() == self.config.headroom_fenster {
            self.headroom.pop_front();
        }
        self.headroom.push_back(wert);
        if wert < 0 {
            self.verspaetung_gesehen = true;
        }
    }

    /// Entfernt Pakete, die vollstaendig vor `zeiger` liegen
    fn veraltete_verwerfen(&mut self, zeiger: u64) {
        loop {
            let ts = match self.pakete.first_key_value() {
                Some((&ts, paket)) if ts.saturating_add(paket.span as u64) <= zeiger => ts,
                _ => break,
            };
            self.pakete.remove(&ts);
            self.statistik.verloren += 1;
            tracing::trace!(zeitstempel = ts, zeiger, "Paket uebersprungen");
        }
    }
}

impl JitterBuffer for AdaptiveJitterBuffer {
    fn put(&mut self, paket: JitterPaket) {
        let ts = paket.zeitstempel;
        self.statistik.empfangen += 1;

        if let Some(grenze) = self.abgespielt_bis {
            if ts.saturating_add(paket.span as u64) <= grenze {
                self.statistik.verspaetet += 1;
                self.verspaetung_gesehen = true;
                tracing::trace!(zeitstempel = ts, grenze, "Verspaetetes Paket verworfen");
                return;
            }
        }

        if self.pakete.contains_key(&ts) {
            self.statistik.duplikate += 1;
            return;
        }

        if let Some(zeiger) = self.zeiger {
            self.headroom_merken(ts.wrapping_sub(zeiger) as i64);
        }

        self.pakete.insert(ts, paket);

        // Ueberlauf: aeltestes Paket verwerfen
        if self.pakete.len() > self.config.max_pakete {
            if let Some((aeltestes, _)) = self.pakete.pop_first() {
                self.statistik.verloren += 1;
                tracing::warn!(zeitstempel = aeltestes, "Buffer-Ueberlauf: Paket verworfen");
            }
        }

        self.statistik.fuellstand = self.pakete.len();
    }

    fn get(&mut self) -> Option<JitterPaket> {
        let zeiger = match self.zeiger {
            Some(z) => z,
            None => {
                // Uhr startet beim aeltesten Paket
                let (&start, _) = self.pakete.first_key_value()?;
                self.zeiger = Some(start);
                start
            }
        };

        self.veraltete_verwerfen(zeiger);

        let grenze = zeiger.saturating_add(self.frame());
        let treffer = self
            .pakete
            .first_key_value()
            .map(|(&ts, _)| ts)
            .filter(|&ts| ts < grenze);

        self.statistik.fuellstand = self.pakete.len();

        match treffer.and_then(|ts| self.pakete.remove(&ts)) {
            Some(paket) => {
                let ende = paket.zeitstempel.max(zeiger).saturating_add(paket.span as u64);
                self.zeiger = Some(ende);
                self.statistik.abgespielt += 1;
                self.statistik.fuellstand = self.pakete.len();
                Some(paket)
            }
            None => {
                self.zeiger = Some(zeiger.saturating_add(self.frame()));
                self.statistik.fehlgriffe += 1;
                None
            }
        }
    }

    fn tick(&mut self) {
        self.abgespielt_bis = self.zeiger;
        self.statistik.ticks += 1;
    }

    fn current_timestamp(&self) -> u64 {
        self.zeiger.unwrap_or(0)
    }

    fn available_count(&self) -> usize {
        match self.zeiger {
            Some(z) => self.pakete.range(z..).count(),
            None => self.pakete.len(),
        }
    }

    fn update_delay(&mut self, hinweis: DelayHinweis) -> DelayAnpassung {
        let frame = self.frame();
        let Some(zeiger) = self.zeiger else {
            return DelayAnpassung::Keine;
        };

        match hinweis {
            DelayHinweis::Verlust => {
                let zu_gross = self.zusatz.saturating_add(frame) > self.config.margin;
                if !self.verspaetung_gesehen || zu_gross {
                    return DelayAnpassung::Keine;
                }
                self.zeiger = Some(zeiger.saturating_sub(frame));
                self.zusatz += frame;
                self.verspaetung_gesehen = false;
                self.headroom.clear();
                self.statistik.verzoegerung_erhoeht += 1;
                self.statistik.zusatz_verzoegerung = self.zusatz;
                tracing::debug!(zusatz = self.zusatz, "Jitter-Verzoegerung erhoeht");
                DelayAnpassung::Erhoeht
            }
            DelayHinweis::FensterEnde => {
                let fenster_voll = self.headroom.len() == self.config.headroom_fenster;
                let minimum = self.headroom.iter().copied().min().unwrap_or(0);
                if self.zusatz < frame || !fenster_voll || minimum < 2 * frame as i64 {
                    return DelayAnpassung::Keine;
                }
                self.zeiger = Some(zeiger.saturating_add(frame));
                self.zusatz -= frame;
                self.headroom.clear();
                self.statistik.verzoegerung_verringert += 1;
                self.statistik.zusatz_verzoegerung = self.zusatz;
                tracing::debug!(zusatz = self.zusatz, "Jitter-Verzoegerung verringert");
                DelayAnpassung::Verringert
            }
        }
    }

    fn resync(&mut self) {
        self.zeiger = None;
        self.abgespielt_bis = None;
        self.headroom.clear();
        self.verspaetung_gesehen = false;
        self.zusatz = 0;
        self.statistik.zusatz_verzoegerung = 0;
    }

    fn reset(&mut self) {
        self.pakete.clear();
        self.statistik.fuellstand = 0;
        self.resync();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const F: u64 = 480;

    fn make_paket(seq: u64) -> JitterPaket {
        JitterPaket {
            daten: Bytes::from(vec![0xAB; 8]),
            zeitstempel: seq * F,
            span: F as u32,
        }
    }

    fn buffer(max_pakete: usize) -> AdaptiveJitterBuffer {
        AdaptiveJitterBuffer::neu(JitterBufferConfig {
            frame_size: F as u32,
            margin: 10 * F,
            max_pakete,
            headroom_fenster: 4,
        })
    }

    #[test]
    fn zeitstempel_am_wertebereichsende() {
        let mut buf = buffer(10);
        let letzte = u64::MAX / F;
        buf.put(make_paket(letzte - 1));
        buf.put(make_paket(letzte));

        assert_eq!(buf.get().unwrap().zeitstempel, (letzte - 1) * F);
        assert_eq!(buf.get().unwrap().zeitstempel, letzte * F);
        assert!(buf.get().is_none());
        buf.tick();
        assert_eq!(buf.current_timestamp(), u64::MAX);

        // Uhr steht am Ende, erneutes Einliefern gilt als verspaetet
        buf.put(make_paket(letzte));
        assert_eq!(buf.statistik().verspaetet, 1);
        assert_eq!(buf.available_count(), 0);
    }

    #[test]
    fn jitter_buffer_reihenfolge_in_order() {
        let mut buf = buffer(10);
        for i in 0..5 {
            buf.put(make_paket(i));
        }
        for i in 0..5 {
            let p = buf.get().expect("Paket erwartet");
            assert_eq!(p.zeitstempel, i * F, "Reihenfolge verletzt");
            buf.tick();
        }
        assert!(buf.get().is_none());
    }

    #[test]
    fn jitter_buffer_out_of_order() {
        let mut buf = buffer(10);
        for seq in [2, 0, 1, 4, 3] {
            buf.put(make_paket(seq));
        }

        let mut ts = Vec::new();
        while let Some(p) = buf.get() {
            ts.push(p.zeitstempel / F);
            buf.tick();
        }
        assert_eq!(ts, vec![0, 1, 2, 3, 4], "Out-of-Order nicht korrekt sortiert");
    }

    #[test]
    fn jitter_buffer_duplikate_verwerfen() {
        let mut buf = buffer(10);
        buf.put(make_paket(1));
        buf.put(make_paket(1));
        buf.put(make_paket(1));
        assert_eq!(buf.fuellstand(), 1, "Duplikate muessen verworfen werden");
        assert_eq!(buf.statistik().duplikate, 2);
    }

    #[test]
    fn uhr_laeuft_erst_nach_erstem_abruf() {
        let mut buf = buffer(10);
        assert_eq!(buf.current_timestamp(), 0);
        assert!(buf.get().is_none(), "Leerer Buffer liefert nichts");
        assert_eq!(buf.current_timestamp(), 0, "Uhr darf ohne Pakete nicht starten");

        buf.put(make_paket(7));
        assert_eq!(buf.available_count(), 1);
        let p = buf.get().unwrap();
        assert_eq!(p.zeitstempel, 7 * F);
        assert_eq!(buf.current_timestamp(), 8 * F);
    }

    #[test]
    fn luecke_erzeugt_fehlgriffe() {
        let mut buf = buffer(20);
        buf.put(make_paket(0));
        buf.put(make_paket(3));

        assert_eq!(buf.get().unwrap().zeitstempel, 0);
        assert!(buf.get().is_none());
        assert!(buf.get().is_none());
        assert_eq!(buf.get().unwrap().zeitstempel, 3 * F);
        assert_eq!(buf.statistik().fehlgriffe, 2);
    }

    #[test]
    fn verspaetetes_paket_wird_verworfen() {
        let mut buf = buffer(10);
        buf.put(make_paket(0));
        buf.put(make_paket(2));
        buf.get();
        buf.tick();
        assert!(buf.get().is_none(), "Seq 1 fehlt");
        buf.tick();

        // Seq 1 kommt nach ihrem Abspielzeitpunkt
        buf.put(make_paket(1));
        assert_eq!(buf.statistik().verspaetet, 1);
        assert_eq!(buf.fuellstand(), 1);
    }

    #[test]
    fn veraltete_pakete_werden_uebersprungen() {
        let mut buf = buffer(10);
        buf.put(make_paket(5));
        buf.get();
        // Seq 3 liegt vor dem Zeiger, wurde aber noch nicht getickt
        buf.put(make_paket(3));
        buf.put(make_paket(6));
        assert_eq!(buf.get().unwrap().zeitstempel, 6 * F);
        assert_eq!(buf.statistik().verloren, 1);
    }

    #[test]
    fn jitter_buffer_ueberlauf_verwirft_aelteste() {
        let mut buf = buffer(3);
        for seq in 0..4 {
            buf.put(make_paket(seq));
        }
        assert_eq!(buf.fuellstand(), 3);
        assert_eq!(buf.get().unwrap().zeitstempel, F);
    }

    #[test]
    fn verfuegbar_zaehlt_ab_zeiger() {
        let mut buf = buffer(10);
        for seq in 0..4 {
            buf.put(make_paket(seq));
        }
        assert_eq!(buf.available_count(), 4);
        buf.get();
        assert_eq!(buf.available_count(), 3);
    }

    #[test]
    fn verzoegerung_steigt_nach_verspaetung() {
        let mut buf = buffer(10);
        buf.put(make_paket(0));
        buf.put(make_paket(1));
        buf.get();
        buf.tick();
        buf.get();
        buf.tick();
        // Zeiger bei 2*F, Seq 1 erneut -> verspaetet
        buf.put(make_paket(1));
        assert!(buf.get().is_none());
        assert_eq!(buf.update_delay(DelayHinweis::Verlust), DelayAnpassung::Erhoeht);
        assert_eq!(buf.current_timestamp(), 2 * F);
        assert_eq!(buf.statistik().zusatz_verzoegerung, F);

        // Ohne neue Verspaetung keine weitere Erhoehung
        assert!(buf.get().is_none());
        assert_eq!(buf.update_delay(DelayHinweis::Verlust), DelayAnpassung::Keine);
    }

    #[test]
    fn verzoegerung_sinkt_bei_grosser_reserve() {
        let mut buf = buffer(20);
        buf.put(make_paket(0));
        buf.put(make_paket(1));
        buf.get();
        buf.tick();
        buf.get();
        buf.tick();
        buf.put(make_paket(1));
        buf.get();
        assert_eq!(buf.update_delay(DelayHinweis::Verlust), DelayAnpassung::Erhoeht);

        // Zeiger bei 2*F: vier Pakete mit mindestens zwei Frames Reserve
        for seq in 4..8 {
            buf.put(make_paket(seq));
        }
        assert_eq!(buf.update_delay(DelayHinweis::FensterEnde), DelayAnpassung::Verringert);
        assert_eq!(buf.current_timestamp(), 3 * F);
        assert_eq!(buf.statistik().zusatz_verzoegerung, 0);
    }

    #[test]
    fn resync_startet_beim_aeltesten_paket() {
        let mut buf = buffer(10);
        buf.put(make_paket(0));
        buf.get();
        for _ in 0..5 {
            buf.get();
            buf.tick();
        }
        buf.put(make_paket(100));
        buf.resync();
        assert_eq!(buf.get().unwrap().zeitstempel, 100 * F);
    }

    #[test]
    fn reset_leert_buffer() {
        let mut buf = buffer(10);
        buf.put(make_paket(0));
        buf.put(make_paket(1));
        buf.reset();
        assert_eq!(buf.fuellstand(), 0);
        assert_eq!(buf.current_timestamp(), 0);
        assert!(buf.get().is_none());
    }
}
