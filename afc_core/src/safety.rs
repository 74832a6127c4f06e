//! Safety envelope: range checks, derating, HTD tier, completion.

use crate::compensation::temp_compensated_charge_current;
use crate::flags::ErrorFlags;
use crate::params::{ChargeParams, CvParams, HtdCfg};
use crate::units::charge_ma;

/// Commanded and measured current against the absolute and per-stage limits.
///
/// A command above the absolute maximum is forced to 0. The measured current
/// answers the previous cycle's command, so under-current is judged against
/// `prev_commanded_ma`.
pub fn check_exceed_chg_curr_range(
    params: &ChargeParams,
    present: usize,
    commanded_ma: &mut u32,
    prev_commanded_ma: u32,
    measured_ma: Option<i32>,
    evse_present: bool,
) -> ErrorFlags {
    let mut flags = ErrorFlags::empty();
    if *commanded_ma > params.current.abs_max_ma {
        tracing::warn!(
            commanded_ma = *commanded_ma,
            abs_max_ma = params.current.abs_max_ma,
            "commanded current above absolute limit"
        );
        *commanded_ma = 0;
        flags |= ErrorFlags::CURRENT_RANGE;
    }
    let Some(measured) = measured_ma else {
        return flags;
    };
    let s = params.stage(present);
    let measured = charge_ma(measured);
    if measured > s.max_ma.saturating_add(params.current.overcurrent_margin_ma) {
        flags |= ErrorFlags::CURRENT_RANGE;
    }
    let expect_flow = evse_present && prev_commanded_ma >= s.min_ma && prev_commanded_ma > 0;
    if expect_flow && measured < s.min_ma.saturating_sub(params.current.undercurrent_margin_ma) {
        flags |= ErrorFlags::CURRENT_RANGE;
    }
    flags
}

/// Sensor readings (last known) and the min/max inputs against the temperature limits.
pub fn check_exceed_temp_range(
    params: &ChargeParams,
    sensors_dc: &[Option<i16>],
    min_dc: Option<i16>,
    max_dc: Option<i16>,
) -> ErrorFlags {
    let t = &params.temp;
    let known = sensors_dc.iter().flatten().copied();
    let hottest = known.clone().chain(max_dc).max();
    let coldest = known.chain(min_dc).min();
    let mut flags = ErrorFlags::empty();
    if hottest.is_some_and(|h| h > t.max_dc) {
        flags |= ErrorFlags::OVER_TEMP;
    }
    if coldest.is_some_and(|c| c < t.min_dc) {
        flags |= ErrorFlags::UNDER_TEMP;
    }
    flags
}

/// Minimum of the input, the stage limit and the temperature-compensated
/// current at the hottest and coldest known temperatures.
pub fn attempt_derate_chg_curr(
    params: &ChargeParams,
    commanded_ma: u32,
    stage_limit_ma: u32,
    hottest_dc: Option<i16>,
    coldest_dc: Option<i16>,
) -> u32 {
    let mut out = commanded_ma.min(stage_limit_ma);
    for t in [hottest_dc, coldest_dc].into_iter().flatten() {
        out = out.min(temp_compensated_charge_current(&params.temp, out, t));
    }
    out
}

/// Completion by CV decay in the terminal stage, or by the SOC band.
pub fn check_chg_completion(
    params: &ChargeParams,
    present: usize,
    decayed_ma: u32,
    flags: ErrorFlags,
    soc_cpct: Option<u16>,
    min_temp_dc: Option<i16>,
) -> bool {
    let cv_done = params.is_terminal(present)
        && decayed_ma <= params.stage(present).step_ma
        && !flags.intersects(ErrorFlags::SAFETY);
    if cv_done {
        return true;
    }
    match (soc_cpct, min_temp_dc) {
        (Some(soc), Some(t)) => soc >= params.completion.soc_limit_cpct(t),
        (Some(soc), None) => params
            .completion
            .bands
            .last()
            .is_some_and(|b| soc >= b.max_soc_cpct),
        _ => false,
    }
}

/// High-temperature derate tier with exit hysteresis.
///
/// The parameter set is chosen from the first known max temperature of the
/// session and kept until `reset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HtdState {
    active: bool,
    set: Option<usize>,
}

impl HtdState {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn selected_set(&self) -> Option<usize> {
        self.set
    }

    /// Update the tier from the hottest known temperature; returns the
    /// percentage of the stage max to use while active.
    pub fn select_htd_parameters(
        &mut self,
        cfg: &HtdCfg,
        hard_max_dc: i16,
        max_temp_dc: Option<i16>,
        soc_cpct: u16,
    ) -> Option<u8> {
        if !cfg.enabled {
            self.active = false;
            return None;
        }
        let t = max_temp_dc?;
        let set = match self.set {
            Some(set) => set,
            None => {
                let set = cfg.set_for(t);
                tracing::debug!(set, temp_dc = t, "HTD parameter set selected");
                self.set = Some(set);
                set
            }
        };
        let Some(params) = cfg.sets.get(set) else {
            self.active = false;
            return None;
        };
        let exit = params.enter_dc.saturating_sub(cfg.exit_hysteresis_dc);
        if !self.active && t >= params.enter_dc && t < hard_max_dc {
            tracing::info!(temp_dc = t, set, "high-temperature derate entered");
            self.active = true;
        } else if self.active && t < exit {
            tracing::info!(temp_dc = t, set, "high-temperature derate exited");
            self.active = false;
        }
        self.active.then(|| cfg.ratio_pct_at(set, soc_cpct, t))
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.set = None;
    }
}

/// Terminal-stage constant-voltage current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvState {
    current_ma: u32,
}

impl CvState {
    pub fn new(cv: &CvParams) -> Self {
        Self {
            current_ma: cv.charge_ma,
        }
    }

    #[inline]
    pub fn current_ma(&self) -> u32 {
        self.current_ma
    }

    /// Step down once if any fresh cell reached the rated voltage.
    pub fn update(&mut self, cv: &CvParams, cells_mv: &[Option<u16>]) -> u32 {
        if cells_mv.iter().flatten().any(|&v| v >= cv.rated_cell_mv) {
            self.current_ma = self.current_ma.saturating_sub(cv.step_ma);
        }
        self.current_ma
    }

    pub fn reset(&mut self, cv: &CvParams) {
        self.current_ma = cv.charge_ma;
    }
}

/// Cap increases at `up_per_cycle`; decreases pass through. 0 disables the limit.
pub fn slew_limit(prev_ma: u32, target_ma: u32, up_per_cycle: u32) -> u32 {
    if up_per_cycle == 0 || target_ma <= prev_ma {
        target_ma
    } else {
        target_ma.min(prev_ma.saturating_add(up_per_cycle))
    }
}
