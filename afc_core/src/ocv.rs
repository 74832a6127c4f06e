//! OCV-vs-SOC lookup.
//!
//! The curve is produced elsewhere and handed over as parallel arrays; the
//! controller only interpolates against it.

use crate::error::ConfigError;
use crate::units::SOC_FULL_CPCT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcvCurve {
    soc_cpct: Vec<u16>,
    ocv_mv: Vec<u16>,
}

impl OcvCurve {
    /// Build a curve from parallel arrays strictly increasing in SOC.
    pub fn new(soc_cpct: Vec<u16>, ocv_mv: Vec<u16>) -> Result<Self, ConfigError> {
        if soc_cpct.len() != ocv_mv.len() {
            return Err(ConfigError::OcvCurve("SOC and OCV arrays differ in length"));
        }
        if soc_cpct.len() < 2 {
            return Err(ConfigError::OcvCurve("at least two points required"));
        }
        if soc_cpct.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ConfigError::OcvCurve("SOC must be strictly increasing"));
        }
        if soc_cpct.last().is_some_and(|&s| s > SOC_FULL_CPCT) {
            return Err(ConfigError::OcvCurve("SOC above 100%"));
        }
        Ok(Self { soc_cpct, ocv_mv })
    }

    pub fn len(&self) -> usize {
        self.soc_cpct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.soc_cpct.is_empty()
    }

    /// Linear interpolation, clamped to the end points.
    pub fn ocv_at(&self, soc_cpct: u16) -> u16 {
        let (Some(&first), Some(&last)) = (self.soc_cpct.first(), self.soc_cpct.last()) else {
            return 0;
        };
        if soc_cpct <= first {
            return self.ocv_mv[0];
        }
        if soc_cpct >= last {
            return self.ocv_mv[self.ocv_mv.len() - 1];
        }
        // first index with soc >= query; in 1..len because of the clamps above
        let hi = self.soc_cpct.partition_point(|&s| s < soc_cpct);
        let lo = hi - 1;
        let (s0, s1) = (i32::from(self.soc_cpct[lo]), i32::from(self.soc_cpct[hi]));
        let (v0, v1) = (i32::from(self.ocv_mv[lo]), i32::from(self.ocv_mv[hi]));
        let v = v0 + (v1 - v0) * (i32::from(soc_cpct) - s0) / (s1 - s0);
        u16::try_from(v).unwrap_or(0)
    }
}

impl Default for OcvCurve {
    /// Generic NMC curve.
    fn default() -> Self {
        Self {
            soc_cpct: vec![
                0, 1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10_000,
            ],
            ocv_mv: vec![
                3300, 3550, 3620, 3670, 3710, 3760, 3830, 3910, 3990, 4080, 4190,
            ],
        }
    }
}

impl TryFrom<&afc_config::OcvTable> for OcvCurve {
    type Error = ConfigError;
    fn try_from(t: &afc_config::OcvTable) -> Result<Self, Self::Error> {
        Self::new(t.soc_cpct.clone(), t.ocv_mv.clone())
    }
}
