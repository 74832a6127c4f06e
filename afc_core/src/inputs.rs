//! Per-cycle inputs and the last-known snapshot.
//!
//! `None` marks a field whose data-received flag is false this cycle.

use crate::params::PackLayout;
use crate::units::SOC_FULL_CPCT;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleInputs {
    /// Positive while charging.
    pub pack_current_ma: Option<i32>,
    pub cell_mv: Vec<Option<u16>>,
    pub temps_dc: Vec<Option<i16>>,
    pub min_temp_dc: Option<i16>,
    pub max_temp_dc: Option<i16>,
    pub capacity_mah: Option<u32>,
    pub soc_cpct: Option<u16>,
    pub evse_present: bool,
    /// Charge level advertised by the charger.
    pub evse_limit_ma: Option<u32>,
}

impl CycleInputs {
    /// All-fresh inputs for a uniform pack.
    pub fn uniform(layout: &PackLayout, cell_mv: u16, temp_dc: i16, soc_cpct: u16) -> Self {
        Self {
            pack_current_ma: Some(0),
            cell_mv: vec![Some(cell_mv); layout.cell_count],
            temps_dc: vec![Some(temp_dc); layout.sensor_count],
            min_temp_dc: Some(temp_dc),
            max_temp_dc: Some(temp_dc),
            capacity_mah: None,
            soc_cpct: Some(soc_cpct),
            evse_present: true,
            evse_limit_ma: None,
        }
    }
}

/// This cycle's fresh values, shaped to the pack layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fresh {
    pub pack_current_ma: Option<i32>,
    pub cell_mv: Vec<Option<u16>>,
    pub temps_dc: Vec<Option<i16>>,
    pub min_temp_dc: Option<i16>,
    pub max_temp_dc: Option<i16>,
    pub capacity_mah: Option<u32>,
    pub soc_cpct: Option<u16>,
}

/// Most recent valid value of every input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastKnown {
    pub pack_current_ma: Option<i32>,
    pub cell_mv: Vec<Option<u16>>,
    pub temps_dc: Vec<Option<i16>>,
    pub min_temp_dc: Option<i16>,
    pub max_temp_dc: Option<i16>,
    pub capacity_mah: Option<u32>,
    pub soc_cpct: Option<u16>,
}

fn shaped<T: Copy>(src: &[Option<T>], len: usize) -> Vec<Option<T>> {
    (0..len).map(|i| src.get(i).copied().flatten()).collect()
}

fn keep<T: Copy>(slot: &mut Option<T>, v: Option<T>) {
    if v.is_some() {
        *slot = v;
    }
}

impl LastKnown {
    pub fn new(layout: &PackLayout) -> Self {
        Self {
            pack_current_ma: None,
            cell_mv: vec![None; layout.cell_count],
            temps_dc: vec![None; layout.sensor_count],
            min_temp_dc: None,
            max_temp_dc: None,
            capacity_mah: None,
            soc_cpct: None,
        }
    }

    /// Copy fresh fields over the snapshot.
    ///
    /// Arrays are truncated or padded (as stale) to the layout; the returned
    /// flag reports whether either array length differed. An SOC above 100 %
    /// and a zero capacity are treated as stale.
    pub fn absorb(&mut self, inputs: &CycleInputs) -> (Fresh, bool) {
        let cells = self.cell_mv.len();
        let sensors = self.temps_dc.len();
        let mismatch = inputs.cell_mv.len() != cells || inputs.temps_dc.len() != sensors;
        let fresh = Fresh {
            pack_current_ma: inputs.pack_current_ma,
            cell_mv: shaped(&inputs.cell_mv, cells),
            temps_dc: shaped(&inputs.temps_dc, sensors),
            min_temp_dc: inputs.min_temp_dc,
            max_temp_dc: inputs.max_temp_dc,
            capacity_mah: inputs.capacity_mah.filter(|&c| c > 0),
            soc_cpct: inputs.soc_cpct.filter(|&s| s <= SOC_FULL_CPCT),
        };

        keep(&mut self.pack_current_ma, fresh.pack_current_ma);
        for (slot, v) in self.cell_mv.iter_mut().zip(&fresh.cell_mv) {
            keep(slot, *v);
        }
        for (slot, v) in self.temps_dc.iter_mut().zip(&fresh.temps_dc) {
            keep(slot, *v);
        }
        keep(&mut self.min_temp_dc, fresh.min_temp_dc);
        keep(&mut self.max_temp_dc, fresh.max_temp_dc);
        keep(&mut self.capacity_mah, fresh.capacity_mah);
        keep(&mut self.soc_cpct, fresh.soc_cpct);
        (fresh, mismatch)
    }

    /// Hottest known temperature over sensors and the max input.
    pub fn hottest_dc(&self) -> Option<i16> {
        self.temps_dc.iter().flatten().copied().chain(self.max_temp_dc).max()
    }

    /// Coldest known temperature over sensors and the min input.
    pub fn coldest_dc(&self) -> Option<i16> {
        self.temps_dc.iter().flatten().copied().chain(self.min_temp_dc).min()
    }

    /// Last-known cell voltages with never-seen cells as 0.
    pub fn cell_mv_or_zero(&self) -> Vec<u16> {
        self.cell_mv.iter().map(|v| v.unwrap_or(0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_fields_keep_previous_values() {
        let layout = PackLayout::even(4, 2);
        let mut lk = LastKnown::new(&layout);
        let mut inp = CycleInputs::uniform(&layout, 3800, 250, 5000);
        lk.absorb(&inp);

        inp.cell_mv[3] = None;
        inp.soc_cpct = Some(12_000);
        let (fresh, mismatch) = lk.absorb(&inp);
        assert!(!mismatch);
        assert_eq!(fresh.cell_mv[3], None);
        assert_eq!(fresh.soc_cpct, None);
        assert_eq!(lk.cell_mv[3], Some(3800));
        assert_eq!(lk.soc_cpct, Some(5000));
    }

    #[test]
    fn short_arrays_are_padded_and_reported() {
        let layout = PackLayout::even(4, 2);
        let mut lk = LastKnown::new(&layout);
        let inp = CycleInputs {
            cell_mv: vec![Some(3700); 3],
            temps_dc: vec![Some(200); 2],
            ..CycleInputs::default()
        };
        let (fresh, mismatch) = lk.absorb(&inp);
        assert!(mismatch);
        assert_eq!(fresh.cell_mv.len(), 4);
        assert_eq!(fresh.cell_mv[3], None);
    }
}
