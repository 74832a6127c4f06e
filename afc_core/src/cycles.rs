//! Charge-cycle counter.

use crate::units::SOC_FULL_CPCT;

/// Full-equivalent charge cycles, accumulated from SOC rises.
///
/// Persisted with the per-cell state; `prev_soc_cpct` doubles as the
/// new-session detector at session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargeCycles {
    pub count: u16,
    pub soc_accum_cpct: u16,
    pub prev_soc_cpct: u16,
}

impl ChargeCycles {
    /// Feed one fresh SOC reading. Readings above 100 % are ignored.
    pub fn track(&mut self, soc_cpct: u16) {
        if soc_cpct > SOC_FULL_CPCT {
            return;
        }
        if soc_cpct > self.prev_soc_cpct {
            let rise = soc_cpct - self.prev_soc_cpct;
            // accum < 10000 and rise <= 10000, so this fits in u16
            let mut accum = self.soc_accum_cpct.saturating_add(rise);
            while accum >= SOC_FULL_CPCT {
                accum -= SOC_FULL_CPCT;
                self.count = self.count.saturating_add(1);
            }
            self.soc_accum_cpct = accum;
        }
        self.prev_soc_cpct = soc_cpct;
    }

    /// True if `soc_cpct` sits more than `drop_cpct` below the last tracked SOC.
    pub fn is_new_session(&self, soc_cpct: u16, drop_cpct: u16) -> bool {
        u32::from(soc_cpct) + u32::from(drop_cpct) < u32::from(self.prev_soc_cpct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_at_u16_max() {
        let mut c = ChargeCycles {
            count: u16::MAX,
            ..ChargeCycles::default()
        };
        c.track(SOC_FULL_CPCT);
        assert_eq!(c.count, u16::MAX);
        assert_eq!(c.soc_accum_cpct, 0);
    }

    #[test]
    fn new_session_needs_a_real_drop() {
        let c = ChargeCycles {
            prev_soc_cpct: 6000,
            ..ChargeCycles::default()
        };
        assert!(!c.is_new_session(5500, 500));
        assert!(c.is_new_session(5499, 500));
        assert!(!c.is_new_session(9000, 500));
    }
}
