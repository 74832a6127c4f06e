//! Parameter table: immutable per-session configuration.
//!
//! These are the runtime structs used by `ChargeSession`. They are separate
//! from the TOML-deserialized config in `afc_config`; see `conversions`.
//! All values are in the integer units described in `units`.

use crate::error::ConfigError;
use crate::units::SOC_FULL_CPCT;

/// Fixed capacity of the per-stage arrays.
pub const MAX_STAGES: usize = 32;
/// Fixed capacity of the per-cell arrays.
pub const MAX_CELLS: usize = 192;
/// Fixed capacity of the per-sensor arrays.
pub const MAX_TEMP_SENSORS: usize = 64;

/// One charge stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageParams {
    /// SOC at which the stage becomes eligible (0.01 %).
    pub soc_cpct: u16,
    pub max_ma: u32,
    pub min_ma: u32,
    /// Current removed per unit of the worst cell's correction index.
    pub step_ma: u32,
    pub ref_start_mv: u16,
    pub ref_band_mv: u16,
    /// Stage-advance-detection ceiling for a single compensated cell voltage.
    pub sad_limit_mv: u16,
}

impl StageParams {
    /// Start-plus-band threshold used to decide whether the stage is already satisfied.
    #[inline]
    pub fn threshold_mv(&self) -> u16 {
        self.ref_start_mv.saturating_add(self.ref_band_mv)
    }
}

/// Constant-voltage (terminal stage) parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvParams {
    pub rated_cell_mv: u16,
    pub charge_ma: u32,
    pub step_ma: u32,
}

impl Default for CvParams {
    fn default() -> Self {
        Self {
            rated_cell_mv: 4200,
            charge_ma: 5000,
            step_ma: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempLimits {
    pub max_dc: i16,
    pub min_dc: i16,
    pub ref_dc: i16,
    /// Width of the linear current ramp beyond either limit.
    pub derate_span_dc: i16,
}

impl Default for TempLimits {
    fn default() -> Self {
        Self {
            max_dc: 570,
            min_dc: -200,
            ref_dc: 300,
            derate_span_dc: 50,
        }
    }
}

/// Compensation coefficients a–h.
///
/// `a, b, c` shape the temperature ratio below the reference and `d, e, f`
/// above it; `g, h` give the current ratio's SOC dependence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
    pub g: f32,
    pub h: f32,
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            a: -0.025_508_56,
            b: 5.883_553e-4,
            c: 9.492_773e-7,
            d: -0.025_586_585,
            e: 5.348_245e-4,
            f: -3.447_703e-6,
            g: 0.752_060_6,
            h: 2.890_117e-5,
        }
    }
}

impl Coefficients {
    fn named(&self) -> [(&'static str, f32); 8] {
        [
            ("a", self.a),
            ("b", self.b),
            ("c", self.c),
            ("d", self.d),
            ("e", self.e),
            ("f", self.f),
            ("g", self.g),
            ("h", self.h),
        ]
    }
}

/// Correction-index tracking and persistence cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingCfg {
    pub noise_floor_mv: u16,
    /// Consecutive over-reference cycles before a correction fires.
    pub min_sampling_cycles: u16,
    pub max_corr_idx: u8,
    /// SOC drop since the last session that marks a new session.
    pub session_reset_soc_drop_cpct: u16,
    /// Save every N cycles; 0 saves only at session end.
    pub save_period_cycles: u32,
    pub save_on_correction: bool,
}

impl Default for TrackingCfg {
    fn default() -> Self {
        Self {
            noise_floor_mv: 5,
            min_sampling_cycles: 3,
            max_corr_idx: 60,
            session_reset_soc_drop_cpct: 500,
            save_period_cycles: 0,
            save_on_correction: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentLimits {
    /// Hardware ceiling; a command above it is zeroed.
    pub abs_max_ma: u32,
    pub overcurrent_margin_ma: u32,
    pub undercurrent_margin_ma: u32,
    /// 0 disables slew limiting.
    pub slew_up_ma_per_cycle: u32,
}

impl Default for CurrentLimits {
    fn default() -> Self {
        Self {
            abs_max_ma: 331_600,
            overcurrent_margin_ma: 500,
            undercurrent_margin_ma: 500,
            slew_up_ma_per_cycle: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionBand {
    pub min_temp_dc: i16,
    pub max_soc_cpct: u16,
}

/// Completion SOC by minimum-temperature band, ascending in `min_temp_dc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCfg {
    pub bands: Vec<CompletionBand>,
}

impl Default for CompletionCfg {
    fn default() -> Self {
        let bands = [
            (-200, 7500),
            (-150, 8430),
            (-100, 9100),
            (-50, 9530),
            (0, 9700),
        ]
        .into_iter()
        .map(|(min_temp_dc, max_soc_cpct)| CompletionBand {
            min_temp_dc,
            max_soc_cpct,
        })
        .collect();
        Self { bands }
    }
}

impl CompletionCfg {
    /// Completion SOC for the band containing `min_temp_dc`.
    /// Colder than the first band uses the first band.
    pub fn soc_limit_cpct(&self, min_temp_dc: i16) -> u16 {
        self.bands
            .iter()
            .rev()
            .find(|b| b.min_temp_dc <= min_temp_dc)
            .or_else(|| self.bands.first())
            .map_or(SOC_FULL_CPCT, |b| b.max_soc_cpct)
    }
}

/// One high-temperature-derate parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtdSet {
    /// Lowest max temperature at session start that selects this set.
    pub select_min_dc: i16,
    pub enter_dc: i16,
    /// Ascending column temperatures.
    pub temp_columns_dc: Vec<i16>,
    /// `[soc row][temp column]`, percent of the stage max current.
    pub ratio_pct: Vec<Vec<u8>>,
}

/// Lowest table percentage produced by `HtdSet::graded`.
const HTD_GRADED_FLOOR_PCT: u8 = 10;

impl HtdSet {
    /// `rows` SOC rows starting at `top`, each `drop_pct` lower than the
    /// previous one, floored at 10 %.
    pub fn graded(
        select_min_dc: i16,
        enter_dc: i16,
        temp_columns_dc: Vec<i16>,
        top: &[u8],
        rows: u8,
        drop_pct: u8,
    ) -> Self {
        let ratio_pct = (0..rows)
            .map(|r| {
                top.iter()
                    .map(|&t| {
                        t.saturating_sub(r.saturating_mul(drop_pct))
                            .max(HTD_GRADED_FLOOR_PCT)
                    })
                    .collect()
            })
            .collect();
        Self {
            select_min_dc,
            enter_dc,
            temp_columns_dc,
            ratio_pct,
        }
    }
}

/// High-temperature-derate parameter sets, keyed by the max temperature
/// seen when the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtdCfg {
    pub enabled: bool,
    pub exit_hysteresis_dc: i16,
    /// SOC distance between table rows.
    pub soc_step_cpct: u16,
    /// Ascending in `select_min_dc`.
    pub sets: Vec<HtdSet>,
}

impl Default for HtdCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            exit_hysteresis_dc: 20,
            soc_step_cpct: 500,
            sets: vec![
                HtdSet::graded(i16::MIN, 450, vec![450, 500, 550], &[90, 70, 50], 21, 2),
                HtdSet::graded(300, 430, vec![430, 480, 530], &[85, 65, 45], 21, 2),
                HtdSet::graded(400, 400, vec![400, 450, 500], &[80, 60, 40], 21, 2),
            ],
        }
    }
}

impl HtdCfg {
    /// Index of the set keyed at or below `max_temp_dc`; colder than every
    /// key selects the first set.
    pub fn set_for(&self, max_temp_dc: i16) -> usize {
        self.sets
            .iter()
            .rposition(|s| s.select_min_dc <= max_temp_dc)
            .unwrap_or(0)
    }

    /// Table lookup in `set`: SOC row by `soc_step_cpct`, hottest column not above `temp_dc`.
    pub fn ratio_pct_at(&self, set: usize, soc_cpct: u16, temp_dc: i16) -> u8 {
        let Some(s) = self.sets.get(set) else {
            return 100;
        };
        let Some(last_row) = s.ratio_pct.len().checked_sub(1) else {
            return 100;
        };
        let row = usize::from(soc_cpct / self.soc_step_cpct.max(1)).min(last_row);
        let col = s
            .temp_columns_dc
            .iter()
            .rposition(|&t| t <= temp_dc)
            .unwrap_or(0);
        s.ratio_pct[row].get(col).copied().unwrap_or(100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingCfg {
    pub early_warning_corr_idx: u8,
    pub abnormal_corr_idx: u8,
    pub extreme_corr_idx: u8,
    pub eol_mitigations: u16,
    pub mitigation_cap_per_stage: u8,
}

impl Default for AgingCfg {
    fn default() -> Self {
        Self {
            early_warning_corr_idx: 8,
            abnormal_corr_idx: 12,
            extreme_corr_idx: 16,
            eol_mitigations: 400,
            mitigation_cap_per_stage: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImbalanceCfg {
    pub enabled: bool,
    pub sigma_level: u8,
    pub noise_floor_mv: u16,
    pub min_sampling_time: u16,
    pub threshold_for_valid_sample: u8,
}

impl Default for ImbalanceCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            sigma_level: 4,
            noise_floor_mv: 8,
            min_sampling_time: 10,
            threshold_for_valid_sample: 6,
        }
    }
}

/// Cell and sensor counts plus the cell-to-sensor map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackLayout {
    pub cell_count: usize,
    pub sensor_count: usize,
    pub cell_sensor: Vec<u8>,
}

impl PackLayout {
    /// Spread `cells` evenly over `sensors` in index order.
    pub fn even(cells: usize, sensors: usize) -> Self {
        let sensors_nz = sensors.max(1);
        let cell_sensor = (0..cells)
            .map(|c| u8::try_from(c * sensors_nz / cells.max(1)).unwrap_or(u8::MAX))
            .collect();
        Self {
            cell_count: cells,
            sensor_count: sensors,
            cell_sensor,
        }
    }
}

impl Default for PackLayout {
    fn default() -> Self {
        Self::even(4, 2)
    }
}

/// The complete parameter table.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeParams {
    pub pack: PackLayout,
    pub stages: Vec<StageParams>,
    pub cv: CvParams,
    pub temp: TempLimits,
    pub coeffs: Coefficients,
    pub tracking: TrackingCfg,
    pub current: CurrentLimits,
    pub completion: CompletionCfg,
    pub htd: HtdCfg,
    pub aging: AgingCfg,
    pub imbalance: ImbalanceCfg,
}

impl Default for ChargeParams {
    fn default() -> Self {
        Self {
            pack: PackLayout::default(),
            stages: vec![
                StageParams {
                    soc_cpct: 0,
                    max_ma: 10_000,
                    min_ma: 2000,
                    step_ma: 500,
                    ref_start_mv: 4000,
                    ref_band_mv: 100,
                    sad_limit_mv: 4150,
                },
                StageParams {
                    soc_cpct: 5000,
                    max_ma: 7000,
                    min_ma: 1500,
                    step_ma: 500,
                    ref_start_mv: 4050,
                    ref_band_mv: 80,
                    sad_limit_mv: 4180,
                },
                StageParams {
                    soc_cpct: 8000,
                    max_ma: 5000,
                    min_ma: 1000,
                    step_ma: 250,
                    ref_start_mv: 4100,
                    ref_band_mv: 60,
                    sad_limit_mv: 4200,
                },
            ],
            cv: CvParams::default(),
            temp: TempLimits::default(),
            coeffs: Coefficients::default(),
            tracking: TrackingCfg::default(),
            current: CurrentLimits::default(),
            completion: CompletionCfg::default(),
            htd: HtdCfg::default(),
            aging: AgingCfg::default(),
            imbalance: ImbalanceCfg::default(),
        }
    }
}

impl ChargeParams {
    /// Reject malformed tables rather than clamping them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.stages.len();
        if n == 0 || n > MAX_STAGES {
            return Err(ConfigError::StageCount(n));
        }
        for (i, s) in self.stages.iter().enumerate() {
            if s.min_ma > s.max_ma {
                return Err(ConfigError::MinExceedsMax { stage: i });
            }
            if s.soc_cpct > SOC_FULL_CPCT {
                return Err(ConfigError::SocOutOfRange { stage: i });
            }
            if s.max_ma > self.current.abs_max_ma {
                return Err(ConfigError::AboveAbsoluteMax { stage: i });
            }
        }
        if let Some(i) = self
            .stages
            .windows(2)
            .position(|w| w[1].soc_cpct <= w[0].soc_cpct)
        {
            return Err(ConfigError::SocNotIncreasing { stage: i + 1 });
        }

        let p = &self.pack;
        if p.cell_count == 0 || p.cell_count > MAX_CELLS {
            return Err(ConfigError::CellCount(p.cell_count));
        }
        if p.sensor_count == 0 || p.sensor_count > MAX_TEMP_SENSORS {
            return Err(ConfigError::SensorCount(p.sensor_count));
        }
        if p.cell_sensor.len() != p.cell_count {
            return Err(ConfigError::SensorMapping {
                cell: p.cell_sensor.len().min(p.cell_count),
            });
        }
        if let Some(cell) = p
            .cell_sensor
            .iter()
            .position(|&s| usize::from(s) >= p.sensor_count)
        {
            return Err(ConfigError::SensorMapping { cell });
        }

        let t = &self.temp;
        if !(t.min_dc < t.ref_dc && t.ref_dc < t.max_dc) {
            return Err(ConfigError::TempLimits);
        }
        if t.derate_span_dc <= 0 {
            return Err(ConfigError::Invalid("temperature derate span must be > 0"));
        }

        if let Some((name, _)) = self.coeffs.named().into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::NonFiniteCoefficient(name));
        }

        if self.cv.rated_cell_mv == 0 {
            return Err(ConfigError::Invalid("CV rated cell voltage must be > 0"));
        }
        if self.tracking.max_corr_idx == 0 {
            return Err(ConfigError::Invalid("max correction index must be >= 1"));
        }
        if self.tracking.min_sampling_cycles == 0 {
            return Err(ConfigError::Invalid("min sampling cycles must be >= 1"));
        }

        let bands = &self.completion.bands;
        if bands.is_empty() || bands.windows(2).any(|w| w[1].min_temp_dc <= w[0].min_temp_dc) {
            return Err(ConfigError::Invalid(
                "completion bands must be non-empty and ascending",
            ));
        }
        if bands.iter().any(|b| b.max_soc_cpct > SOC_FULL_CPCT) {
            return Err(ConfigError::Invalid("completion SOC above 100%"));
        }

        let h = &self.htd;
        if h.enabled {
            if h.exit_hysteresis_dc < 0 || h.soc_step_cpct == 0 {
                return Err(ConfigError::Invalid("HTD hysteresis or SOC step out of range"));
            }
            if h.sets.is_empty() {
                return Err(ConfigError::Invalid("HTD needs at least one parameter set"));
            }
            if h.sets.windows(2).any(|w| w[1].select_min_dc <= w[0].select_min_dc) {
                return Err(ConfigError::Invalid(
                    "HTD sets must be ascending in selection temperature",
                ));
            }
            for set in &h.sets {
                if set.enter_dc >= t.max_dc {
                    return Err(ConfigError::Invalid(
                        "HTD entry temperature must be below the max limit",
                    ));
                }
                let cols = &set.temp_columns_dc;
                if cols.is_empty() || cols.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(ConfigError::Invalid("HTD columns must be non-empty and ascending"));
                }
                if set.ratio_pct.is_empty()
                    || set
                        .ratio_pct
                        .iter()
                        .any(|r| r.len() != cols.len() || r.iter().any(|&p| p > 100))
                {
                    return Err(ConfigError::Invalid("HTD table shape or percentage out of range"));
                }
            }
        }

        let a = &self.aging;
        if !(a.early_warning_corr_idx <= a.abnormal_corr_idx
            && a.abnormal_corr_idx <= a.extreme_corr_idx)
        {
            return Err(ConfigError::Invalid("aging thresholds out of order"));
        }
        if a.eol_mitigations == 0 {
            return Err(ConfigError::Invalid("EOL mitigation limit must be >= 1"));
        }

        let im = &self.imbalance;
        if im.enabled && (im.min_sampling_time == 0 || im.threshold_for_valid_sample == 0) {
            return Err(ConfigError::Invalid("imbalance sampling settings must be >= 1"));
        }
        Ok(())
    }

    #[inline]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn terminal_idx(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }

    #[inline]
    pub fn is_terminal(&self, idx: usize) -> bool {
        idx >= self.terminal_idx()
    }

    /// Stage parameters, clamping `idx` to the terminal stage.
    ///
    /// Callers hold a validated table, so `stages` is never empty.
    #[inline]
    pub fn stage(&self, idx: usize) -> &StageParams {
        &self.stages[idx.min(self.terminal_idx())]
    }

    /// Highest stage whose SOC threshold is at or below `soc_cpct`.
    pub fn soc_stage_idx(&self, soc_cpct: u16) -> usize {
        self.stages
            .iter()
            .rposition(|s| s.soc_cpct <= soc_cpct)
            .unwrap_or(0)
    }

    /// Temperature sensor measuring `cell`.
    #[inline]
    pub fn sensor_for_cell(&self, cell: usize) -> usize {
        self.pack
            .cell_sensor
            .get(cell)
            .map_or(0, |&s| usize::from(s))
    }

    /// Reference voltage for a cell at `stage` with correction index `corr_idx`.
    ///
    /// Index 0 sits at the top of the band; `max_corr_idx` at its start.
    pub fn reference_cell_mv(&self, stage: usize, corr_idx: u8) -> u16 {
        let s = self.stage(stage);
        let max = u32::from(self.tracking.max_corr_idx.max(1));
        let k = u32::from(corr_idx).min(max);
        let drop = u32::from(s.ref_band_mv) * k / max;
        let mv = u32::from(s.threshold_mv()).saturating_sub(drop);
        u16::try_from(mv).unwrap_or(u16::MAX)
    }
}
