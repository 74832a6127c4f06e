//! Voltage-imbalance detection (median/MAD over summed cell voltages).

use crate::params::ImbalanceCfg;

/// Outcome of one analysis window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImbalanceVerdict {
    /// Cells whose sum sits below the median by more than the threshold. May be empty.
    Flagged(Vec<usize>),
    /// MAD or sampling time of zero; no statistic could be formed.
    Invalid,
}

/// Upper median (`sorted[n/2]`).
fn upper_median(mut v: Vec<u32>) -> u32 {
    v.sort_unstable();
    v.get(v.len() / 2).copied().unwrap_or(0)
}

/// Flag low outliers among per-cell voltage sums.
pub fn analyze_sums(cfg: &ImbalanceCfg, sums: &[u32], sampling_time: u16) -> ImbalanceVerdict {
    if sums.is_empty() || sampling_time == 0 {
        return ImbalanceVerdict::Invalid;
    }
    let median = upper_median(sums.to_vec());
    let mad = upper_median(sums.iter().map(|&s| s.abs_diff(median)).collect());
    if mad == 0 {
        return ImbalanceVerdict::Invalid;
    }
    let threshold = (u32::from(cfg.sigma_level) * mad)
        .max(u32::from(cfg.noise_floor_mv) * u32::from(sampling_time));
    let flagged = sums
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s < median && median - s > threshold)
        .map(|(i, _)| i)
        .collect();
    ImbalanceVerdict::Flagged(flagged)
}

/// Sampling accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoltageImbalance {
    exec_counter: u8,
    sampling_time: u16,
    sums: Vec<u32>,
}

impl VoltageImbalance {
    pub fn new(cells: usize) -> Self {
        Self {
            exec_counter: 0,
            sampling_time: 0,
            sums: vec![0; cells],
        }
    }

    pub fn sampling_time(&self) -> u16 {
        self.sampling_time
    }

    /// Feed one cycle. Only cycles with every cell fresh while charging count.
    ///
    /// Returns a verdict once `min_sampling_time` samples have been summed;
    /// the accumulator then starts over.
    pub fn accumulate(
        &mut self,
        cfg: &ImbalanceCfg,
        cells_mv: &[Option<u16>],
        charging: bool,
    ) -> Option<ImbalanceVerdict> {
        if !cfg.enabled || !charging || cells_mv.len() != self.sums.len() {
            return None;
        }
        if cells_mv.iter().any(Option::is_none) {
            return None;
        }
        self.exec_counter = self.exec_counter.saturating_add(1);
        if self.exec_counter < cfg.threshold_for_valid_sample {
            return None;
        }
        self.exec_counter = 0;
        for (sum, v) in self.sums.iter_mut().zip(cells_mv.iter().flatten()) {
            *sum = sum.saturating_add(u32::from(*v));
        }
        self.sampling_time = self.sampling_time.saturating_add(1);
        if self.sampling_time < cfg.min_sampling_time {
            return None;
        }
        let verdict = analyze_sums(cfg, &self.sums, self.sampling_time);
        self.reset();
        Some(verdict)
    }

    pub fn reset(&mut self) {
        self.exec_counter = 0;
        self.sampling_time = 0;
        self.sums.fill(0);
    }
}
