//! Stage/threshold tracker.
//!
//! Owns the present stage index and the per-cell over-reference counters.
//! The persisted per-cell state (`PersistedState`) is borrowed per call so
//! the session controls when it is saved.

use crate::nvm::PersistedState;
use crate::params::ChargeParams;

/// Highest stage already satisfied by every fresh cell.
///
/// A stage is satisfied when its start-plus-band threshold is at or below the
/// minimum compensated voltage over fresh cells. Returns 0 when no stage is
/// satisfied or no cell reading is known.
pub fn find_highest_cpv_stage_idx(params: &ChargeParams, compensated_mv: &[Option<u16>]) -> usize {
    let Some(min_mv) = compensated_mv.iter().flatten().copied().min() else {
        return 0;
    };
    params
        .stages
        .iter()
        .rposition(|s| s.threshold_mv() <= min_mv)
        .unwrap_or(0)
}

/// Reasons the present stage may advance this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceSignals {
    /// A correction index was incremented this cycle.
    pub corr_fired: bool,
    /// `find_highest_cpv_stage_idx` for this cycle.
    pub highest_satisfied: usize,
    /// Stage selected by the fresh SOC, if any.
    pub soc_stage: Option<usize>,
    /// A fresh compensated cell voltage reached the present stage's SAD limit.
    pub sad_reached: bool,
}

impl AdvanceSignals {
    fn wants_advance(&self, present: usize) -> bool {
        self.corr_fired
            || self.highest_satisfied > present
            || self.soc_stage.is_some_and(|s| s > present)
            || self.sad_reached
    }
}

/// `present + 1` when not terminal and any advance signal holds, else `present`.
pub fn attempt_to_inc_cpv_idx(params: &ChargeParams, present: usize, signals: &AdvanceSignals) -> usize {
    if present + 1 < params.stage_count() && signals.wants_advance(present) {
        present + 1
    } else {
        present
    }
}

/// Stage current reduced by the worst cell's correction index, floored at the stage min.
///
/// `htd_pct` scales the stage max first while the high-temperature tier is active.
pub fn calc_chg_curr_present_stg(
    params: &ChargeParams,
    present: usize,
    max_corr_idx: u8,
    htd_pct: Option<u8>,
) -> u32 {
    let s = params.stage(present);
    let max_ma = htd_pct.map_or(s.max_ma, |p| crate::units::scale_pct(s.max_ma, p));
    let reduction = s.step_ma.saturating_mul(u32::from(max_corr_idx));
    max_ma.saturating_sub(reduction).max(s.min_ma)
}

#[derive(Debug, Clone)]
pub struct StageTracker {
    present: usize,
    over_count: Vec<u16>,
    /// Cells whose reference was skipped at the last advance because they were stale.
    stale_ref: Vec<bool>,
}

impl StageTracker {
    pub fn new(cells: usize) -> Self {
        Self {
            present: 0,
            over_count: vec![0; cells],
            stale_ref: vec![false; cells],
        }
    }

    #[inline]
    pub fn present(&self) -> usize {
        self.present
    }

    /// Enter a session at `start_idx`.
    ///
    /// With `reset`, correction indices clear and references move to the top
    /// of the start stage's band. Otherwise persisted indices and references
    /// carry over.
    pub fn start(
        &mut self,
        params: &ChargeParams,
        state: &mut PersistedState,
        start_idx: usize,
        reset: bool,
    ) {
        self.present = start_idx.min(params.terminal_idx());
        self.over_count.fill(0);
        self.stale_ref.fill(false);
        if reset {
            state.corr_idx.fill(0);
            let r = params.reference_cell_mv(self.present, 0);
            state.ref_mv.fill(r);
        }
    }

    /// Compare every fresh cell against its reference and fire corrections.
    ///
    /// The terminal stage is regulated by the constant-voltage decay, so no
    /// corrections fire there. Returns the cells whose correction index was
    /// incremented.
    pub fn cpv_track(
        &mut self,
        params: &ChargeParams,
        state: &mut PersistedState,
        compensated_mv: &[Option<u16>],
    ) -> Vec<usize> {
        let noise = params.tracking.noise_floor_mv;
        let need = params.tracking.min_sampling_cycles.max(1);
        let max_idx = params.tracking.max_corr_idx;
        let terminal = params.is_terminal(self.present);
        let next_stage = (self.present + 1).min(params.terminal_idx());
        let mut fired = Vec::new();

        for (cell, v) in compensated_mv.iter().enumerate() {
            let Some(v) = *v else { continue };
            if cell >= state.cell_count() {
                break;
            }
            if self.stale_ref[cell] {
                state.ref_mv[cell] = params.reference_cell_mv(self.present, state.corr_idx[cell]);
                self.stale_ref[cell] = false;
            }
            if terminal {
                self.over_count[cell] = 0;
                continue;
            }
            if v > state.ref_mv[cell].saturating_add(noise) {
                self.over_count[cell] = self.over_count[cell].saturating_add(1);
            } else {
                self.over_count[cell] = 0;
                continue;
            }
            if self.over_count[cell] < need {
                continue;
            }
            self.over_count[cell] = 0;
            let idx = state.corr_idx[cell];
            if idx >= max_idx {
                continue;
            }
            let idx = idx + 1;
            state.corr_idx[cell] = idx;
            state.ref_mv[cell] = params.reference_cell_mv(next_stage, idx);
            if let Some(h) = state.highest_corr_idx.get_mut(self.present) {
                *h = (*h).max(idx);
            }
            tracing::debug!(cell, corr_idx = idx, ref_mv = state.ref_mv[cell], "correction fired");
            fired.push(cell);
        }
        fired
    }

    /// Apply `attempt_to_inc_cpv_idx`; on advance, re-derive references for the new stage.
    ///
    /// Stale cells keep their reference until their next fresh reading.
    pub fn advance(
        &mut self,
        params: &ChargeParams,
        state: &mut PersistedState,
        signals: &AdvanceSignals,
        compensated_mv: &[Option<u16>],
    ) -> bool {
        let next = attempt_to_inc_cpv_idx(params, self.present, signals);
        if next == self.present {
            return false;
        }
        tracing::info!(from = self.present, to = next, "stage advance");
        self.present = next;
        for cell in 0..state.cell_count() {
            let fresh = compensated_mv.get(cell).is_some_and(Option::is_some);
            if fresh {
                state.ref_mv[cell] = params.reference_cell_mv(next, state.corr_idx[cell]);
                self.over_count[cell] = 0;
            } else {
                self.stale_ref[cell] = true;
            }
        }
        true
    }
}
