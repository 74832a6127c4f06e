//! Persisted-state codec.
//!
//! Little-endian layout:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 2 | magic `0xAFC1` |
//! | 2 | 1 | layout version |
//! | 3 | 1 | stage count |
//! | 4 | 2 | cell count |
//! | 6 | 2 | charge cycles |
//! | 8 | 2 | SOC accumulator |
//! | 10 | 2 | previous SOC |
//! | 12 | 2 | total mitigations |
//! | 14 | 1 | flags (bit 0: end of life) |
//! | 15 | S | highest correction index per stage |
//! | 15+S | C | correction index per cell |
//! | 15+S+C | 2C | reference voltage per cell |
//! | 15+S+3C | 2 | CRC-16/CCITT-FALSE of everything before |
//!
//! Decoding never panics on arbitrary input.

use byteorder::{ByteOrder, LittleEndian};

use crate::cycles::ChargeCycles;
use crate::error::NvmError;
use afc_traits::PersistedRegion;

pub const MAGIC: u16 = 0xAFC1;
pub const VERSION: u8 = 1;
const HEADER_LEN: usize = 15;
const CRC_LEN: usize = 2;
const FLAG_EOL: u8 = 1 << 0;

/// Per-pack state carried across power cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    pub cycles: ChargeCycles,
    pub total_mitigations: u16,
    pub end_of_life: bool,
    pub highest_corr_idx: Vec<u8>,
    pub corr_idx: Vec<u8>,
    pub ref_mv: Vec<u16>,
}

impl PersistedState {
    /// No-history state: zero indices, every reference at `ref_mv`.
    pub fn new(stages: usize, cells: usize, ref_mv: u16) -> Self {
        Self {
            cycles: ChargeCycles::default(),
            total_mitigations: 0,
            end_of_life: false,
            highest_corr_idx: vec![0; stages],
            corr_idx: vec![0; cells],
            ref_mv: vec![ref_mv; cells],
        }
    }

    pub fn stage_count(&self) -> usize {
        self.highest_corr_idx.len()
    }

    pub fn cell_count(&self) -> usize {
        self.corr_idx.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let stages = self.stage_count();
        let cells = self.cell_count();
        let mut buf = vec![0u8; encoded_len(stages, cells)];

        LittleEndian::write_u16(&mut buf[0..2], MAGIC);
        buf[2] = VERSION;
        // counts are bounded by MAX_STAGES / MAX_CELLS at build
        buf[3] = u8::try_from(stages).unwrap_or(u8::MAX);
        LittleEndian::write_u16(&mut buf[4..6], u16::try_from(cells).unwrap_or(u16::MAX));
        LittleEndian::write_u16(&mut buf[6..8], self.cycles.count);
        LittleEndian::write_u16(&mut buf[8..10], self.cycles.soc_accum_cpct);
        LittleEndian::write_u16(&mut buf[10..12], self.cycles.prev_soc_cpct);
        LittleEndian::write_u16(&mut buf[12..14], self.total_mitigations);
        buf[14] = if self.end_of_life { FLAG_EOL } else { 0 };

        let mut at = HEADER_LEN;
        buf[at..at + stages].copy_from_slice(&self.highest_corr_idx);
        at += stages;
        buf[at..at + cells].copy_from_slice(&self.corr_idx);
        at += cells;
        LittleEndian::write_u16_into(&self.ref_mv, &mut buf[at..at + 2 * cells]);
        at += 2 * cells;

        let crc = crc16_ccitt(&buf[..at]);
        LittleEndian::write_u16(&mut buf[at..at + CRC_LEN], crc);
        buf
    }

    /// Parse an image for a pack with the given shape.
    pub fn decode(bytes: &[u8], stages: usize, cells: usize) -> Result<Self, NvmError> {
        let needed = encoded_len(stages, cells);
        let head = &bytes[..bytes.len().min(needed)];
        if is_erased(head) {
            return Err(NvmError::Erased);
        }
        if bytes.len() < HEADER_LEN {
            return Err(NvmError::Truncated {
                needed: HEADER_LEN,
                have: bytes.len(),
            });
        }
        let magic = LittleEndian::read_u16(&bytes[0..2]);
        if magic != MAGIC {
            return Err(NvmError::BadMagic(magic));
        }
        if bytes[2] != VERSION {
            return Err(NvmError::VersionMismatch(bytes[2]));
        }
        let stored_stages = usize::from(bytes[3]);
        if stored_stages != stages {
            return Err(NvmError::StageCountMismatch {
                stored: stored_stages,
                expected: stages,
            });
        }
        let stored_cells = usize::from(LittleEndian::read_u16(&bytes[4..6]));
        if stored_cells != cells {
            return Err(NvmError::CellCountMismatch {
                stored: stored_cells,
                expected: cells,
            });
        }
        if bytes.len() < needed {
            return Err(NvmError::Truncated {
                needed,
                have: bytes.len(),
            });
        }
        let body = needed - CRC_LEN;
        let stored = LittleEndian::read_u16(&bytes[body..needed]);
        let computed = crc16_ccitt(&bytes[..body]);
        if stored != computed {
            return Err(NvmError::CrcMismatch { stored, computed });
        }

        let mut at = HEADER_LEN;
        let highest_corr_idx = bytes[at..at + stages].to_vec();
        at += stages;
        let corr_idx = bytes[at..at + cells].to_vec();
        at += cells;
        let mut ref_mv = vec![0u16; cells];
        LittleEndian::read_u16_into(&bytes[at..at + 2 * cells], &mut ref_mv);

        Ok(Self {
            cycles: ChargeCycles {
                count: LittleEndian::read_u16(&bytes[6..8]),
                soc_accum_cpct: LittleEndian::read_u16(&bytes[8..10]),
                prev_soc_cpct: LittleEndian::read_u16(&bytes[10..12]),
            },
            total_mitigations: LittleEndian::read_u16(&bytes[12..14]),
            end_of_life: bytes[14] & FLAG_EOL != 0,
            highest_corr_idx,
            corr_idx,
            ref_mv,
        })
    }
}

/// Size of an encoded image.
pub const fn encoded_len(stages: usize, cells: usize) -> usize {
    HEADER_LEN + stages + 3 * cells + CRC_LEN
}

fn is_erased(bytes: &[u8]) -> bool {
    !bytes.is_empty() && (bytes.iter().all(|&b| b == 0xFF) || bytes.iter().all(|&b| b == 0x00))
}

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no xorout.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Result of reading the region at session setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Restored(PersistedState),
    /// Erased or never written.
    FirstRun,
    /// Present but rejected; the caller falls back to defaults.
    Corrupt(NvmError),
}

/// Read and decode the region. Never fails; rejection is reported in the outcome.
pub fn load<R: PersistedRegion + ?Sized>(region: &mut R, stages: usize, cells: usize) -> LoadOutcome {
    let mut buf = vec![0u8; encoded_len(stages, cells).min(region.capacity())];
    let n = match region.read(&mut buf) {
        Ok(n) => n.min(buf.len()),
        Err(e) => {
            tracing::warn!(error = %e, "persisted region read failed");
            return LoadOutcome::Corrupt(NvmError::ReadFailed);
        }
    };
    match PersistedState::decode(&buf[..n], stages, cells) {
        Ok(state) => LoadOutcome::Restored(state),
        Err(NvmError::Erased) => LoadOutcome::FirstRun,
        Err(e) if n == 0 => {
            tracing::debug!(error = %e, "persisted region empty");
            LoadOutcome::FirstRun
        }
        Err(e) => LoadOutcome::Corrupt(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
        assert_eq!(crc16_ccitt(&[]), 0xFFFF);
    }

    #[test]
    fn layout_offsets() {
        let mut s = PersistedState::new(2, 3, 4100);
        s.cycles.count = 0x0102;
        s.end_of_life = true;
        s.corr_idx = vec![7, 8, 9];
        let b = s.encode();
        assert_eq!(b.len(), encoded_len(2, 3));
        assert_eq!(&b[0..2], &[0xC1, 0xAF]);
        assert_eq!(b[3], 2);
        assert_eq!(&b[4..6], &[3, 0]);
        assert_eq!(&b[6..8], &[0x02, 0x01]);
        assert_eq!(b[14], 1);
        assert_eq!(&b[17..20], &[7, 8, 9]);
        assert_eq!(&b[20..22], &4100u16.to_le_bytes());
    }

    #[test]
    fn erased_images_are_first_run() {
        assert_eq!(PersistedState::decode(&[0xFF; 64], 3, 4), Err(NvmError::Erased));
        assert_eq!(PersistedState::decode(&[0x00; 64], 3, 4), Err(NvmError::Erased));
    }

    #[test]
    fn short_garbage_is_truncated() {
        assert!(matches!(
            PersistedState::decode(&[0xC1, 0xAF, 1], 3, 4),
            Err(NvmError::Truncated { .. })
        ));
    }
}
