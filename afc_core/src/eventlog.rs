//! Diagnostic event records and in-memory sinks.

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};

use afc_traits::EventLog;

/// Number of cells reported in a correction-index event.
pub const TOP_CELLS: usize = 5;
/// Placeholder cell id when the pack has fewer than `TOP_CELLS` cells.
pub const NO_CELL: u8 = u8::MAX;

/// Indices of the `TOP_CELLS` highest voltages; ties go to the higher index.
pub fn top_cells(cells_mv: &[u16]) -> [u8; TOP_CELLS] {
    let mut order: Vec<usize> = (0..cells_mv.len()).collect();
    order.sort_unstable_by(|&a, &b| cells_mv[b].cmp(&cells_mv[a]).then(b.cmp(&a)));
    let mut out = [NO_CELL; TOP_CELLS];
    for (slot, &cell) in out.iter_mut().zip(order.iter()) {
        *slot = u8::try_from(cell).unwrap_or(NO_CELL);
    }
    out
}

/// Correction-index event, 19 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrIdxEvent {
    pub cycles: u16,
    pub stage: u8,
    pub cells: [u8; TOP_CELLS],
    pub temps_dc: [i16; TOP_CELLS],
    pub highest_corr_idx: u8,
}

impl CorrIdxEvent {
    pub const LEN: usize = 3 + TOP_CELLS + 2 * TOP_CELLS + 1;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        LittleEndian::write_u16(&mut b[0..2], self.cycles);
        b[2] = self.stage;
        b[3..3 + TOP_CELLS].copy_from_slice(&self.cells);
        LittleEndian::write_i16_into(&self.temps_dc, &mut b[8..18]);
        b[18] = self.highest_corr_idx;
        b
    }
}

/// SOC-imbalance event, 3 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocImbalanceEvent {
    pub cycles: u16,
    pub cell: u8,
}

impl SocImbalanceEvent {
    pub const LEN: usize = 3;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut b = [0u8; Self::LEN];
        LittleEndian::write_u16(&mut b[0..2], self.cycles);
        b[2] = self.cell;
        b
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventLog for NullSink {
    fn append(&mut self, _record: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Bounded circular log; the oldest whole records are evicted to make room.
#[derive(Debug, Clone)]
pub struct RingLog {
    capacity: usize,
    used: usize,
    records: VecDeque<Vec<u8>>,
}

impl RingLog {
    pub const DEFAULT_CAPACITY: usize = 4000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            records: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records.iter().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for RingLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventLog for RingLog {
    fn append(&mut self, record: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if record.len() > self.capacity {
            return Err(format!(
                "record of {} bytes exceeds log capacity {}",
                record.len(),
                self.capacity
            )
            .into());
        }
        while self.used + record.len() > self.capacity {
            match self.records.pop_front() {
                Some(old) => self.used -= old.len(),
                None => break,
            }
        }
        self.used += record.len();
        self.records.push_back(record.to_vec());
        Ok(())
    }
}
