//! Byte-Cursor fuer Voice-Pakete
//!
//! Liest ein empfangenes Paket sequentiell. Ein Lesezugriff hinter dem
//! Datenende loest keinen Panic aus, sondern markiert den Cursor als
//! ungueltig und liefert `0` bzw. ein leeres Slice. Der Aufrufer prueft
//! nach dem Parsen einmalig [`PacketCursor::is_valid`].
//!
//! ## Varint-Format
//!
//! ```text
//! Praefix      Folgebytes  Wertebereich
//! ----------   ----------  ------------
//! 0xxxxxxx     0           7 Bit
//! 10xxxxxx     1           14 Bit
//! 110xxxxx     2           21 Bit
//! 1110xxxx     3           28 Bit
//! 111100__     4           32 Bit
//! 111101__     8           64 Bit
//! 111110__     Varint      negierter Folgewert
//! 111111xx     0           negierte 2 Bit
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use sprechfunk_core::{Result, SprechfunkError};

// ---------------------------------------------------------------------------
// PacketCursor
// ---------------------------------------------------------------------------

/// Sequentieller Leser ueber einem empfangenen Paket
#[derive(Debug, Clone)]
pub struct PacketCursor<'a> {
    daten: &'a [u8],
    position: usize,
    /// Anzahl der Bytes, die hinter dem Datenende angefordert wurden
    fehlend: usize,
}

impl<'a> PacketCursor<'a> {
    /// Erstellt einen Cursor am Anfang des Pakets
    pub fn new(daten: &'a [u8]) -> Self {
        Self {
            daten,
            position: 0,
            fehlend: 0,
        }
    }

    /// Liest ein einzelnes Byte (`0` hinter dem Datenende)
    pub fn next_byte(&mut self) -> u8 {
        match self.daten.get(self.position) {
            Some(&b) => {
                self.position += 1;
                b
            }
            None => {
                self.fehlend = self.fehlend.saturating_add(1);
                0
            }
        }
    }

    /// Liest einen Varint (siehe Modul-Dokumentation)
    pub fn read_varint(&mut self) -> u64 {
        let mut negationen = 0u32;
        let wert = loop {
            let v = self.next_byte() as u64;

            if v & 0x80 == 0x00 {
                break v & 0x7F;
            } else if v & 0xC0 == 0x80 {
                break (v & 0x3F) << 8 | self.next_byte() as u64;
            } else if v & 0xF0 == 0xF0 {
                match v & 0xFC {
                    0xF0 => break self.read_be(4),
                    0xF4 => break self.read_be(8),
                    0xF8 => {
                        // Negativer Wert: es folgt ein weiterer Varint
                        negationen += 1;
                        continue;
                    }
                    _ => break !(v & 0x03),
                }
            } else if v & 0xF0 == 0xE0 {
                break (v & 0x0F) << 24 | self.read_be(3);
            } else {
                // 110xxxxx
                break (v & 0x1F) << 16 | self.read_be(2);
            }
        };

        if negationen % 2 == 1 {
            !wert
        } else {
            wert
        }
    }

    /// Entnimmt `laenge` Bytes als Slice
    ///
    /// Reicht der Rest nicht aus, wird der Cursor ungueltig und das
    /// verfuegbare Rest-Slice zurueckgegeben.
    pub fn data_block(&mut self, laenge: usize) -> &'a [u8] {
        let rest = self.remaining();
        if laenge > rest {
            self.fehlend = self.fehlend.saturating_add(laenge - rest);
            let block = &self.daten[self.position..];
            self.position = self.daten.len();
            return block;
        }
        let block = &self.daten[self.position..self.position + laenge];
        self.position += laenge;
        block
    }

    /// Ueberspringt `laenge` Bytes
    pub fn skip(&mut self, laenge: usize) {
        let _ = self.data_block(laenge);
    }

    /// Anzahl noch lesbarer Bytes
    pub fn remaining(&self) -> usize {
        self.daten.len() - self.position
    }

    /// Aktuelle Leseposition
    pub fn position(&self) -> usize {
        self.position
    }

    /// true solange nie hinter das Datenende gelesen wurde
    pub fn is_valid(&self) -> bool {
        self.fehlend == 0
    }

    /// Wie [`is_valid`](Self::is_valid), aber als `Result` fuer `?`
    pub fn require_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SprechfunkError::DatenEnde {
                benoetigt: self.daten.len().saturating_add(self.fehlend),
                verfuegbar: self.daten.len(),
            })
        }
    }

    fn read_be(&mut self, bytes: usize) -> u64 {
        (0..bytes).fold(0u64, |acc, _| acc << 8 | self.next_byte() as u64)
    }
}

// ---------------------------------------------------------------------------
// PacketWriter
// ---------------------------------------------------------------------------

/// Schreibt ausgehende Voice-Pakete
#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    puffer: BytesMut,
}

impl PacketWriter {
    /// Erstellt einen leeren Writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Erstellt einen Writer mit vorreservierter Kapazitaet
    pub fn with_capacity(kapazitaet: usize) -> Self {
        Self {
            puffer: BytesMut::with_capacity(kapazitaet),
        }
    }

    /// Haengt ein einzelnes Byte an
    pub fn append(&mut self, byte: u8) {
        self.puffer.put_u8(byte);
    }

    /// Haengt ein Byte-Slice an
    pub fn append_slice(&mut self, daten: &[u8]) {
        self.puffer.put_slice(daten);
    }

    /// Schreibt einen vorzeichenlosen Varint in der kuerzesten Kodierung
    pub fn write_varint(&mut self, wert: u64) {
        if wert < 0x80 {
            self.puffer.put_u8(wert as u8);
        } else if wert < 0x4000 {
            self.puffer.put_u8((wert >> 8) as u8 | 0x80);
            self.puffer.put_u8(wert as u8);
        } else if wert < 0x20_0000 {
            self.puffer.put_u8((wert >> 16) as u8 | 0xC0);
            self.puffer.put_u16(wert as u16);
        } else if wert < 0x1000_0000 {
            self.puffer.put_u8((wert >> 24) as u8 | 0xE0);
            self.puffer.put_uint(wert & 0xFF_FFFF, 3);
        } else if wert < 0x1_0000_0000 {
            self.puffer.put_u8(0xF0);
            self.puffer.put_u32(wert as u32);
        } else {
            self.puffer.put_u8(0xF4);
            self.puffer.put_u64(wert);
        }
    }

    /// Anzahl geschriebener Bytes
    pub fn len(&self) -> usize {
        self.puffer.len()
    }

    /// true wenn noch nichts geschrieben wurde
    pub fn is_empty(&self) -> bool {
        self.puffer.is_empty()
    }

    /// Bisher geschriebene Bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.puffer
    }

    /// Verwirft den Inhalt, behaelt die Kapazitaet
    pub fn clear(&mut self) {
        self.puffer.clear();
    }

    /// Schliesst das Paket ab
    pub fn freeze(self) -> Bytes {
        self.puffer.freeze()
    }
}
