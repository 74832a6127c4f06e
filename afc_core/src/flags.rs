//! Error and aging flag sets.

use bitflags::bitflags;

bitflags! {
    /// Bits of the error-flags bitmask reported every cycle.
    ///
    /// Safety bits are re-evaluated each cycle; aging bits mirror the latched
    /// `AgingFlags`.
    #[derive(Default)]
    pub struct ErrorFlags: u32 {
        const OVER_TEMP = 1 << 0;
        const UNDER_TEMP = 1 << 1;
        const CURRENT_RANGE = 1 << 2;
        /// High-temperature derate tier active (informational).
        const HTD_ACTIVE = 1 << 3;
        /// Persisted image rejected at session start; state reinitialised.
        const NVM_CORRUPT = 1 << 4;
        /// Writing the persisted image failed.
        const NVM_WRITE = 1 << 5;
        /// Cell or sensor array length differs from the pack layout.
        const INPUT_SHAPE = 1 << 6;
        const EARLY_WARNING_AGING = 1 << 11;
        const ABNORMAL_AGING = 1 << 12;
        const EXTREME_AGING = 1 << 13;
        /// Imbalance analysis ran on degenerate data (MAD or sampling time 0).
        const IMBALANCE_INVALID = 1 << 14;
        const END_OF_LIFE = 1 << 15;
        const SOC_IMBALANCE = 1 << 16;

        /// Violations that trigger derating.
        const SAFETY = Self::OVER_TEMP.bits | Self::UNDER_TEMP.bits | Self::CURRENT_RANGE.bits;
    }
}

bitflags! {
    /// Aging and imbalance flags, latched for the rest of the session once set.
    #[derive(Default)]
    pub struct AgingFlags: u8 {
        const EARLY_WARNING = 1 << 0;
        const ABNORMAL = 1 << 1;
        const EXTREME = 1 << 2;
        const END_OF_LIFE = 1 << 3;
        const SOC_IMBALANCE = 1 << 4;
    }
}

impl AgingFlags {
    /// Error-bitmask image of the aging flags.
    pub fn error_bits(self) -> ErrorFlags {
        let mut out = ErrorFlags::empty();
        out.set(
            ErrorFlags::EARLY_WARNING_AGING,
            self.contains(Self::EARLY_WARNING),
        );
        out.set(ErrorFlags::ABNORMAL_AGING, self.contains(Self::ABNORMAL));
        out.set(ErrorFlags::EXTREME_AGING, self.contains(Self::EXTREME));
        out.set(ErrorFlags::END_OF_LIFE, self.contains(Self::END_OF_LIFE));
        out.set(ErrorFlags::SOC_IMBALANCE, self.contains(Self::SOC_IMBALANCE));
        out
    }
}

/// Aging flags as booleans, for the interface boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgingStatus {
    pub extreme_aging: bool,
    pub abnormal_aging: bool,
    pub early_warning_aging: bool,
    pub end_of_life: bool,
    pub soc_imbalance: bool,
}

impl From<AgingFlags> for AgingStatus {
    fn from(f: AgingFlags) -> Self {
        Self {
            extreme_aging: f.contains(AgingFlags::EXTREME),
            abnormal_aging: f.contains(AgingFlags::ABNORMAL),
            early_warning_aging: f.contains(AgingFlags::EARLY_WARNING),
            end_of_life: f.contains(AgingFlags::END_OF_LIFE),
            soc_imbalance: f.contains(AgingFlags::SOC_IMBALANCE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_are_stable() {
        assert_eq!(ErrorFlags::CURRENT_RANGE.bits(), 4);
        assert_eq!(ErrorFlags::ABNORMAL_AGING.bits(), 1 << 12);
        assert_eq!(ErrorFlags::IMBALANCE_INVALID.bits(), 16_384);
        assert_eq!(ErrorFlags::SAFETY.bits(), 0b111);
    }

    #[test]
    fn aging_maps_to_error_bits() {
        let f = AgingFlags::ABNORMAL | AgingFlags::EXTREME;
        let e = f.error_bits();
        assert!(e.contains(ErrorFlags::ABNORMAL_AGING | ErrorFlags::EXTREME_AGING));
        assert!(!e.intersects(ErrorFlags::SAFETY));

        let s = AgingStatus::from(f);
        assert!(s.abnormal_aging && s.extreme_aging);
        assert!(!s.end_of_life && !s.early_warning_aging && !s.soc_imbalance);
    }
}
