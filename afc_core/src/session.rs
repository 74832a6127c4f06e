//! Session facade: one `set_inputs` call per control cycle.
//!
//! Per-cycle sequence:
//!
//! 1. absorb inputs into the last-known snapshot
//! 2. compensation ratios and compensated cell voltages
//! 3. session lifecycle (start on EVSE rising edge, end on EVSE loss)
//! 4. charge-cycle tracking
//! 5. stage tracking (`cpv_track`, then the advance attempt)
//! 6. current calculation (HTD, CV, EVSE cap, slew)
//! 7. safety checks and derate
//! 8. completion
//! 9. aging and imbalance bookkeeping
//! 10. NVM save cadence

use afc_traits::{EventLog, PersistedRegion};

use crate::aging;
use crate::compensation::{
    current_ratio, temp_curr_compensated_voltage, temperature_ratio,
};
use crate::diag::{DIAG_LEN, Diagnostics};
use crate::error::{AfcError, Result};
use crate::eventlog::{CorrIdxEvent, NO_CELL, SocImbalanceEvent, TOP_CELLS, top_cells};
use crate::flags::{AgingFlags, AgingStatus, ErrorFlags};
use crate::imbalance::{ImbalanceVerdict, VoltageImbalance};
use crate::inputs::{CycleInputs, Fresh, LastKnown};
use crate::nvm::{self, LoadOutcome, PersistedState};
use crate::ocv::OcvCurve;
use crate::params::ChargeParams;
use crate::safety::{
    CvState, HtdState, attempt_derate_chg_curr, check_chg_completion,
    check_exceed_chg_curr_range, check_exceed_temp_range, slew_limit,
};
use crate::tracker::{
    AdvanceSignals, StageTracker, calc_chg_curr_present_stg, find_highest_cpv_stage_idx,
};

/// Everything the host receives after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutputs {
    pub error_flags: u32,
    pub charge_current_ma: u32,
    pub pack_voltage_mv: u32,
    pub complete: bool,
    /// Present stage max current (HTD-scaled) before correction-index mitigation.
    pub max_reference_current_ma: u32,
    /// Stage current after correction-index mitigation.
    pub mitigated_current_ma: u32,
    pub aging: AgingStatus,
    pub diagnostics: [u8; DIAG_LEN],
}

impl CycleOutputs {
    pub fn flags(&self) -> ErrorFlags {
        ErrorFlags::from_bits_truncate(self.error_flags)
    }
}

/// Compensated voltages plus the ratios that produced them.
struct Compensated {
    cells_mv: Vec<Option<u16>>,
    current_ratio: f32,
}

pub struct ChargeSession<R, L> {
    params: ChargeParams,
    ocv: OcvCurve,
    region: R,
    log: L,
    state: PersistedState,
    tracker: StageTracker,
    last: LastKnown,
    cv: CvState,
    htd: HtdState,
    imbalance: VoltageImbalance,
    aging: AgingFlags,
    /// Warning bits that persist until the session closes.
    warnings: ErrorFlags,
    in_session: bool,
    complete: bool,
    reset_pending: bool,
    prev_evse: bool,
    prev_commanded_ma: u32,
    cycles_since_save: u32,
    last_current_ratio: f32,
}

impl<R, L> core::fmt::Debug for ChargeSession<R, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChargeSession")
            .field("stage", &self.tracker.present())
            .field("in_session", &self.in_session)
            .field("complete", &self.complete)
            .field("aging", &self.aging)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

impl<R: PersistedRegion, L: EventLog> ChargeSession<R, L> {
    /// Load persisted state and assemble a session. Parameters must already be validated.
    pub(crate) fn from_parts(params: ChargeParams, ocv: OcvCurve, mut region: R, log: L) -> Self {
        let stages = params.stage_count();
        let cells = params.pack.cell_count;
        let mut warnings = ErrorFlags::empty();
        let (state, reset_pending) = match nvm::load(&mut region, stages, cells) {
            LoadOutcome::Restored(s) => {
                tracing::info!(
                    cycles = s.cycles.count,
                    total_mitigations = s.total_mitigations,
                    "persisted state restored"
                );
                (s, false)
            }
            LoadOutcome::FirstRun => {
                tracing::info!("no persisted state; first run");
                (PersistedState::new(stages, cells, params.reference_cell_mv(0, 0)), true)
            }
            LoadOutcome::Corrupt(e) => {
                tracing::warn!(error = %e, "persisted state rejected; using defaults");
                warnings |= ErrorFlags::NVM_CORRUPT;
                (PersistedState::new(stages, cells, params.reference_cell_mv(0, 0)), true)
            }
        };
        let mut aging = AgingFlags::empty();
        aging.set(AgingFlags::END_OF_LIFE, state.end_of_life);

        Self {
            tracker: StageTracker::new(cells),
            last: LastKnown::new(&params.pack),
            cv: CvState::new(&params.cv),
            htd: HtdState::default(),
            imbalance: VoltageImbalance::new(cells),
            aging,
            warnings,
            in_session: false,
            complete: false,
            reset_pending,
            prev_evse: false,
            prev_commanded_ma: 0,
            cycles_since_save: 0,
            last_current_ratio: 0.0,
            params,
            ocv,
            region,
            log,
            state,
        }
    }

    /// Run one control cycle. Always returns a complete output set.
    pub fn set_inputs(&mut self, inputs: &CycleInputs) -> CycleOutputs {
        let (fresh, mismatch) = self.last.absorb(inputs);
        let mut flags = ErrorFlags::empty();
        if mismatch {
            tracing::warn!(
                cells = inputs.cell_mv.len(),
                sensors = inputs.temps_dc.len(),
                "input arrays do not match the pack layout"
            );
            flags |= ErrorFlags::INPUT_SHAPE;
        }

        let comp = self.compensate(&fresh);
        self.last_current_ratio = comp.current_ratio;

        // lifecycle
        if inputs.evse_present && !self.prev_evse && !self.in_session && !self.complete {
            self.begin_session(&fresh, &comp.cells_mv);
        }
        if !inputs.evse_present {
            if self.in_session {
                self.end_session();
            }
            self.complete = false;
        }
        self.prev_evse = inputs.evse_present;

        if !self.in_session {
            flags |= check_exceed_temp_range(
                &self.params,
                &self.last.temps_dc,
                self.last.min_temp_dc,
                self.last.max_temp_dc,
            );
            self.prev_commanded_ma = 0;
            return self.outputs(flags, 0, 0, 0, &comp, inputs.evse_present);
        }

        if let Some(soc) = fresh.soc_cpct {
            self.keep_track_of_chrg_cycles(soc);
        }

        // stage tracking
        let fired = self
            .tracker
            .cpv_track(&self.params, &mut self.state, &comp.cells_mv);
        if !fired.is_empty() {
            let cells = self.last.cell_mv_or_zero();
            self.log_corr_idx_event(&cells);
        }
        let sad_limit = self.params.stage(self.tracker.present()).sad_limit_mv;
        let signals = AdvanceSignals {
            corr_fired: !fired.is_empty(),
            highest_satisfied: find_highest_cpv_stage_idx(&self.params, &comp.cells_mv),
            soc_stage: fresh.soc_cpct.map(|s| self.params.soc_stage_idx(s)),
            sad_reached: comp.cells_mv.iter().flatten().any(|&v| v >= sad_limit),
        };
        let was_terminal = self.params.is_terminal(self.tracker.present());
        if self
            .tracker
            .advance(&self.params, &mut self.state, &signals, &comp.cells_mv)
            && !was_terminal
            && self.params.is_terminal(self.tracker.present())
        {
            self.cv.reset(&self.params.cv);
        }
        let present = self.tracker.present();

        // current calculation
        let soc_known = self.last.soc_cpct.unwrap_or(0);
        let htd_pct = self.htd.select_htd_parameters(
            &self.params.htd,
            self.params.temp.max_dc,
            self.last.hottest_dc(),
            soc_known,
        );
        if self.htd.is_active() {
            flags |= ErrorFlags::HTD_ACTIVE;
        }
        let stage = self.params.stage(present);
        let max_reference_ma = htd_pct.map_or(stage.max_ma, |p| crate::units::scale_pct(stage.max_ma, p));
        let max_corr = self.state.corr_idx.iter().copied().max().unwrap_or(0);
        let mitigated_ma = calc_chg_curr_present_stg(&self.params, present, max_corr, htd_pct);
        let mut commanded = mitigated_ma;
        if self.params.is_terminal(present) {
            commanded = commanded.min(self.cv.update(&self.params.cv, &fresh.cell_mv));
        }
        let decayed_ma = commanded;
        if let Some(limit) = inputs.evse_limit_ma {
            commanded = commanded.min(limit);
        }
        commanded = slew_limit(
            self.prev_commanded_ma,
            commanded,
            self.params.current.slew_up_ma_per_cycle,
        );

        // safety
        flags |= check_exceed_chg_curr_range(
            &self.params,
            present,
            &mut commanded,
            self.prev_commanded_ma,
            fresh.pack_current_ma,
            inputs.evse_present,
        );
        flags |= check_exceed_temp_range(
            &self.params,
            &self.last.temps_dc,
            self.last.min_temp_dc,
            self.last.max_temp_dc,
        );
        if flags.intersects(ErrorFlags::SAFETY) || !self.aging.is_empty() {
            let derated = attempt_derate_chg_curr(
                &self.params,
                commanded,
                mitigated_ma,
                self.last.hottest_dc(),
                self.last.coldest_dc(),
            );
            if derated < commanded {
                tracing::debug!(from = commanded, to = derated, ?flags, "current derated");
            }
            commanded = derated;
        }

        // completion
        if check_chg_completion(
            &self.params,
            present,
            decayed_ma,
            flags,
            fresh.soc_cpct,
            self.last.coldest_dc(),
        ) {
            commanded = 0;
            self.complete = true;
        }

        // aging and imbalance
        let highest = self.state.highest_corr_idx.iter().copied().max().unwrap_or(0);
        self.aging |= aging::flags_for_highest(&self.params.aging, highest);
        let charging = fresh.pack_current_ma.is_some_and(|i| i > 0);
        if let Some(verdict) =
            self.imbalance
                .accumulate(&self.params.imbalance, &fresh.cell_mv, charging)
        {
            self.apply_imbalance(verdict);
        }

        // persistence
        self.cycles_since_save = self.cycles_since_save.saturating_add(1);
        let period = self.params.tracking.save_period_cycles;
        let periodic = period > 0 && self.cycles_since_save >= period;
        let on_correction = !fired.is_empty() && self.params.tracking.save_on_correction;
        if self.complete {
            tracing::info!(stage = present, "charge complete");
            self.end_session();
        } else if periodic || on_correction {
            self.save_or_flag();
        }

        tracing::trace!(stage = present, commanded, ?flags, "cycle");
        self.prev_commanded_ma = commanded;
        self.outputs(flags, commanded, max_reference_ma, mitigated_ma, &comp, true)
    }

    fn compensate(&self, fresh: &Fresh) -> Compensated {
        let p = &self.params;
        let present = self.tracker.present();
        let rated = self
            .last
            .capacity_mah
            .unwrap_or_else(|| p.stage(present).max_ma);
        let (cr, ocv) = match (self.last.pack_current_ma, self.last.soc_cpct) {
            (Some(i), Some(soc)) => (
                current_ratio(&p.coeffs, i, rated, soc),
                self.ocv.ocv_at(soc),
            ),
            _ => (0.0, 0),
        };
        let cells_mv = fresh
            .cell_mv
            .iter()
            .enumerate()
            .map(|(cell, v)| {
                let v = (*v)?;
                let t = self
                    .last
                    .temps_dc
                    .get(p.sensor_for_cell(cell))
                    .copied()
                    .flatten()
                    .unwrap_or(p.temp.ref_dc)
                    .clamp(p.temp.min_dc, p.temp.max_dc);
                let tr = temperature_ratio(&p.coeffs, t, p.temp.ref_dc);
                Some(temp_curr_compensated_voltage(v, ocv, tr, cr))
            })
            .collect();
        Compensated {
            cells_mv,
            current_ratio: cr,
        }
    }

    fn begin_session(&mut self, fresh: &Fresh, comp_mv: &[Option<u16>]) {
        let drop = self.params.tracking.session_reset_soc_drop_cpct;
        let soc = fresh.soc_cpct.or(self.last.soc_cpct);
        let soc_reset = soc.is_some_and(|s| self.state.cycles.is_new_session(s, drop));
        let reset = self.reset_pending || soc_reset;
        let start = soc
            .map_or(0, |s| self.params.soc_stage_idx(s))
            .max(find_highest_cpv_stage_idx(&self.params, comp_mv));

        self.tracker
            .start(&self.params, &mut self.state, start, reset);
        self.cv.reset(&self.params.cv);
        self.htd.reset();
        self.imbalance.reset();
        self.aging = AgingFlags::empty();
        self.aging.set(AgingFlags::END_OF_LIFE, self.state.end_of_life);
        self.reset_pending = false;
        self.in_session = true;
        self.complete = false;
        self.prev_commanded_ma = 0;
        self.cycles_since_save = 0;
        tracing::info!(
            stage = self.tracker.present(),
            reset,
            soc_cpct = soc,
            cycles = self.state.cycles.count,
            "charge session started"
        );
    }

    fn end_session(&mut self) {
        if aging::close_session(&self.params.aging, &mut self.state) {
            self.aging |= AgingFlags::END_OF_LIFE;
        }
        self.in_session = false;
        self.warnings = ErrorFlags::empty();
        self.save_or_flag();
        tracing::info!(
            stage = self.tracker.present(),
            total_mitigations = self.state.total_mitigations,
            "charge session ended"
        );
    }

    fn save_or_flag(&mut self) {
        match self.save_nvm() {
            Ok(()) => {
                self.cycles_since_save = 0;
                self.warnings.remove(ErrorFlags::NVM_WRITE);
            }
            Err(e) => {
                tracing::warn!(error = %e, "persisted state save failed");
                self.warnings |= ErrorFlags::NVM_WRITE;
            }
        }
    }

    fn apply_imbalance(&mut self, verdict: ImbalanceVerdict) {
        match verdict {
            ImbalanceVerdict::Invalid => {
                tracing::debug!("imbalance window degenerate");
                self.warnings |= ErrorFlags::IMBALANCE_INVALID;
            }
            ImbalanceVerdict::Flagged(cells) => {
                for cell in cells {
                    self.aging |= AgingFlags::SOC_IMBALANCE;
                    self.log_soc_imbalance_event(cell);
                }
            }
        }
    }

    fn outputs(
        &self,
        flags: ErrorFlags,
        commanded: u32,
        max_reference_ma: u32,
        mitigated_ma: u32,
        comp: &Compensated,
        evse_present: bool,
    ) -> CycleOutputs {
        let all = flags | self.warnings | self.aging.error_bits();
        let present = self.tracker.present();
        let fresh_comp = comp.cells_mv.iter().flatten().copied();
        let diag = Diagnostics {
            stage: u8::try_from(present).unwrap_or(u8::MAX),
            complete: self.complete,
            htd_active: self.htd.is_active(),
            evse_present,
            in_session: self.in_session,
            error_flags: all.bits(),
            commanded_ma: commanded,
            pack_current_ma: self.last.pack_current_ma.unwrap_or(0),
            soc_cpct: self.last.soc_cpct.unwrap_or(0),
            min_temp_dc: self.last.coldest_dc().unwrap_or(0),
            max_temp_dc: self.last.hottest_dc().unwrap_or(0),
            min_comp_mv: fresh_comp.clone().min().unwrap_or(0),
            max_comp_mv: fresh_comp.max().unwrap_or(0),
            max_corr_idx: self.state.corr_idx.iter().copied().max().unwrap_or(0),
            stage_highest_corr_idx: self
                .state
                .highest_corr_idx
                .get(present)
                .copied()
                .unwrap_or(0),
            cycles: self.state.cycles.count,
            total_mitigations: self.state.total_mitigations,
        };
        let cells = u32::try_from(self.params.pack.cell_count).unwrap_or(u32::MAX);
        // no voltage target outside an active charge
        let pack_voltage_mv = if self.in_session && !self.complete {
            u32::from(self.params.cv.rated_cell_mv).saturating_mul(cells)
        } else {
            0
        };
        CycleOutputs {
            error_flags: all.bits(),
            charge_current_ma: commanded,
            pack_voltage_mv,
            complete: self.complete,
            max_reference_current_ma: max_reference_ma,
            mitigated_current_ma: mitigated_ma,
            aging: AgingStatus::from(self.aging),
            diagnostics: diag.to_bytes(),
        }
    }

    /// Feed one fresh SOC reading into the charge-cycle counter.
    pub fn keep_track_of_chrg_cycles(&mut self, soc_cpct: u16) {
        let before = self.state.cycles.count;
        self.state.cycles.track(soc_cpct);
        if self.state.cycles.count != before {
            tracing::info!(cycles = self.state.cycles.count, "charge cycle counted");
        }
    }

    /// Append a correction-index event for the five highest cells.
    pub fn log_corr_idx_event(&mut self, cells_mv: &[u16]) {
        let present = self.tracker.present();
        let cells = top_cells(cells_mv);
        let mut temps_dc = [0i16; TOP_CELLS];
        for (t, &cell) in temps_dc.iter_mut().zip(cells.iter()) {
            if cell == NO_CELL {
                continue;
            }
            let sensor = self.params.sensor_for_cell(usize::from(cell));
            *t = self.last.temps_dc.get(sensor).copied().flatten().unwrap_or(0);
        }
        let ev = CorrIdxEvent {
            cycles: self.state.cycles.count,
            stage: u8::try_from(present).unwrap_or(u8::MAX),
            cells,
            temps_dc,
            highest_corr_idx: self
                .state
                .highest_corr_idx
                .get(present)
                .copied()
                .unwrap_or(0),
        };
        tracing::info!(
            cycles = ev.cycles,
            stage = ev.stage,
            cells = ?ev.cells,
            temps_dc = ?ev.temps_dc,
            highest_corr_idx = ev.highest_corr_idx,
            "correction index event"
        );
        if let Err(e) = self.log.append(&ev.to_bytes()) {
            tracing::warn!(error = %e, "event log append failed");
        }
    }

    /// Append a SOC-imbalance event for `cell`.
    pub fn log_soc_imbalance_event(&mut self, cell: usize) {
        let ev = SocImbalanceEvent {
            cycles: self.state.cycles.count,
            cell: u8::try_from(cell).unwrap_or(NO_CELL),
        };
        tracing::warn!(cycles = ev.cycles, cell = ev.cell, "SOC imbalance detected");
        if let Err(e) = self.log.append(&ev.to_bytes()) {
            tracing::warn!(error = %e, "event log append failed");
        }
    }

    /// Encode the persisted state and write it to the region.
    pub fn save_nvm(&mut self) -> Result<()> {
        let bytes = self.state.encode();
        self.region
            .write(&bytes)
            .map_err(|e| eyre::Report::new(AfcError::Persistence(e.to_string())))
    }

    /// Discard correction history.
    ///
    /// Applies immediately inside a session; otherwise at the next session start.
    pub fn reinit(&mut self) {
        if self.in_session {
            let present = self.tracker.present();
            self.tracker
                .start(&self.params, &mut self.state, present, true);
            self.state.highest_corr_idx.fill(0);
            self.aging
                .remove(AgingFlags::EARLY_WARNING | AgingFlags::ABNORMAL | AgingFlags::EXTREME);
            tracing::info!(stage = present, "correction state reinitialised");
        } else {
            self.reset_pending = true;
        }
    }

    #[inline]
    pub fn params(&self) -> &ChargeParams {
        &self.params
    }

    #[inline]
    pub fn persisted(&self) -> &PersistedState {
        &self.state
    }

    #[inline]
    pub fn present_stage(&self) -> usize {
        self.tracker.present()
    }

    #[inline]
    pub fn is_in_session(&self) -> bool {
        self.in_session
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn last_known(&self) -> &LastKnown {
        &self.last
    }

    /// Current ratio computed in the last cycle.
    pub fn last_current_ratio(&self) -> f32 {
        self.last_current_ratio
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn event_log(&self) -> &L {
        &self.log
    }

    pub fn into_parts(self) -> (R, L) {
        (self.region, self.log)
    }
}
