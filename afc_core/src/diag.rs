//! Fixed 32-byte diagnostic snapshot, refreshed every cycle.

use byteorder::{ByteOrder, LittleEndian};

pub const DIAG_LEN: usize = 32;
pub const DIAG_MAGIC: u16 = 0xAFD0;

const BIT_COMPLETE: u8 = 1 << 0;
const BIT_HTD: u8 = 1 << 1;
const BIT_EVSE: u8 = 1 << 2;
const BIT_SESSION: u8 = 1 << 3;

/// Values captured for the host's diagnostic buffer. Missing readings encode as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub stage: u8,
    pub complete: bool,
    pub htd_active: bool,
    pub evse_present: bool,
    pub in_session: bool,
    pub error_flags: u32,
    pub commanded_ma: u32,
    pub pack_current_ma: i32,
    pub soc_cpct: u16,
    pub min_temp_dc: i16,
    pub max_temp_dc: i16,
    pub min_comp_mv: u16,
    pub max_comp_mv: u16,
    pub max_corr_idx: u8,
    pub stage_highest_corr_idx: u8,
    pub cycles: u16,
    pub total_mitigations: u16,
}

impl Diagnostics {
    pub fn to_bytes(&self) -> [u8; DIAG_LEN] {
        let mut b = [0u8; DIAG_LEN];
        LittleEndian::write_u16(&mut b[0..2], DIAG_MAGIC);
        b[2] = self.stage;
        let mut bits = 0;
        for (on, bit) in [
            (self.complete, BIT_COMPLETE),
            (self.htd_active, BIT_HTD),
            (self.evse_present, BIT_EVSE),
            (self.in_session, BIT_SESSION),
        ] {
            if on {
                bits |= bit;
            }
        }
        b[3] = bits;
        LittleEndian::write_u32(&mut b[4..8], self.error_flags);
        LittleEndian::write_u32(&mut b[8..12], self.commanded_ma);
        LittleEndian::write_i32(&mut b[12..16], self.pack_current_ma);
        LittleEndian::write_u16(&mut b[16..18], self.soc_cpct);
        LittleEndian::write_i16(&mut b[18..20], self.min_temp_dc);
        LittleEndian::write_i16(&mut b[20..22], self.max_temp_dc);
        LittleEndian::write_u16(&mut b[22..24], self.min_comp_mv);
        LittleEndian::write_u16(&mut b[24..26], self.max_comp_mv);
        b[26] = self.max_corr_idx;
        b[27] = self.stage_highest_corr_idx;
        LittleEndian::write_u16(&mut b[28..30], self.cycles);
        LittleEndian::write_u16(&mut b[30..32], self.total_mitigations);
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_bits() {
        let d = Diagnostics {
            stage: 2,
            complete: true,
            evse_present: true,
            commanded_ma: 5000,
            ..Diagnostics::default()
        };
        let b = d.to_bytes();
        assert_eq!(&b[0..4], &[0xD0, 0xAF, 2, BIT_COMPLETE | BIT_EVSE]);
        assert_eq!(&b[8..12], &5000u32.to_le_bytes());
    }
}
