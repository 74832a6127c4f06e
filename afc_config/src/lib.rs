#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and OCV curve parsing for the charge controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The OCV CSV loader enforces headers and strict SOC monotonicity.
//!
//! Human-facing units are used here (°C, percent); `afc_core::conversions`
//! maps them onto the core's integer units.
use serde::Deserialize;
use serde::de::Deserializer;

/// OCV curve CSV schema.
///
/// Expected headers:
/// soc_cpct,ocv_mv
///
/// Example:
/// soc_cpct,ocv_mv
/// 0,3300
/// 10000,4190
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct OcvRow {
    pub soc_cpct: u16,
    pub ocv_mv: u16,
}

/// Parallel OCV arrays, strictly increasing in SOC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcvTable {
    pub soc_cpct: Vec<u16>,
    pub ocv_mv: Vec<u16>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PackCfg {
    /// Number of series cells reported per cycle.
    pub cells: usize,
    /// Number of temperature sensors reported per cycle.
    pub sensors: usize,
    /// Sensor index measuring each cell. Empty spreads cells evenly over sensors.
    pub cell_sensor: Vec<u8>,
}

impl Default for PackCfg {
    fn default() -> Self {
        Self {
            cells: 4,
            sensors: 2,
            cell_sensor: Vec::new(),
        }
    }
}

/// A key after the last `[[stages]]` header lands in that stage, so
/// unknown keys are rejected rather than dropped.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct StageCfg {
    /// SOC (percent) at which this stage becomes eligible.
    pub soc_pct: f32,
    pub max_ma: u32,
    pub min_ma: u32,
    pub step_ma: u32,
    pub ref_start_mv: u16,
    pub ref_band_mv: u16,
    /// Stage-advance-detection ceiling for a single cell.
    pub sad_limit_mv: u16,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CvCfg {
    pub rated_cell_mv: u16,
    pub charge_ma: u32,
    pub step_ma: u32,
}

impl Default for CvCfg {
    fn default() -> Self {
        Self {
            rated_cell_mv: 4200,
            charge_ma: 5000,
            step_ma: 250,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TemperatureCfg {
    pub max_c: f32,
    pub min_c: f32,
    pub ref_c: f32,
    /// Width of the linear current ramp beyond either limit.
    pub derate_span_c: f32,
}

impl Default for TemperatureCfg {
    fn default() -> Self {
        Self {
            max_c: 57.0,
            min_c: -20.0,
            ref_c: 30.0,
            derate_span_c: 5.0,
        }
    }
}

/// Compensation model coefficients.
///
/// - a, b, c: exponent polynomial below the reference temperature
/// - d, e, f: exponent polynomial above the reference temperature
/// - g, h: current-ratio intercept and SOC slope (per 0.01 %)
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CoefficientsCfg {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
    pub g: f32,
    pub h: f32,
}

impl Default for CoefficientsCfg {
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

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct TrackingCfg {
    pub noise_floor_mv: u16,
    /// Consecutive over-reference cycles before a correction fires.
    pub min_sampling_cycles: u16,
    pub max_corr_idx: u8,
    /// SOC drop (percent) since the last session that marks a new session.
    pub session_reset_soc_drop_pct: f32,
    /// Periodic save cadence in cycles; 0 saves only at session end.
    pub save_period_cycles: u32,
    pub save_on_correction: bool,
}

impl Default for TrackingCfg {
    fn default() -> Self {
        Self {
            noise_floor_mv: 5,
            min_sampling_cycles: 3,
            max_corr_idx: 60,
            session_reset_soc_drop_pct: 5.0,
            save_period_cycles: 0,
            save_on_correction: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CurrentCfg {
    /// Absolute hardware ceiling for the commanded current.
    pub abs_max_ma: u32,
    pub overcurrent_margin_ma: u32,
    pub undercurrent_margin_ma: u32,
    /// Max rise of the commanded current per cycle; 0 disables slew limiting.
    pub slew_up_ma_per_cycle: u32,
}

impl Default for CurrentCfg {
    fn default() -> Self {
        Self {
            abs_max_ma: 331_600,
            overcurrent_margin_ma: 500,
            undercurrent_margin_ma: 500,
            slew_up_ma_per_cycle: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CompletionBandCfg {
    /// Lower bound of the band on the pack's minimum temperature.
    pub min_temp_c: f32,
    /// SOC (percent) at or above which charging completes in this band.
    pub max_soc_pct: f32,
}

/// One `[[htd.sets]]` table.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HtdSetCfg {
    /// Lowest max temperature at session start that selects this set.
    /// Absent matches any temperature.
    pub select_min_c: Option<f32>,
    pub enter_c: f32,
    /// Ascending column temperatures.
    pub temp_columns_c: Vec<f32>,
    /// Rows by SOC, columns by temperature; percent of the stage max current.
    pub ratio_pct: Vec<Vec<u8>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HtdCfg {
    pub enabled: bool,
    pub exit_hysteresis_c: f32,
    /// SOC distance (percent) between rows of each set's `ratio_pct`.
    pub soc_step_pct: f32,
    /// Ascending in `select_min_c`.
    pub sets: Vec<HtdSetCfg>,
}

/// 21 rows (0..=100 % in 5 % steps), 2 % lower per row, floored at 10 %.
fn graded_rows(top: &[u8]) -> Vec<Vec<u8>> {
    (0u8..21)
        .map(|r| top.iter().map(|&t| t.saturating_sub(2 * r).max(10)).collect())
        .collect()
}

impl Default for HtdCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            exit_hysteresis_c: 2.0,
            soc_step_pct: 5.0,
            sets: vec![
                HtdSetCfg {
                    select_min_c: None,
                    enter_c: 45.0,
                    temp_columns_c: vec![45.0, 50.0, 55.0],
                    ratio_pct: graded_rows(&[90, 70, 50]),
                },
                HtdSetCfg {
                    select_min_c: Some(30.0),
                    enter_c: 43.0,
                    temp_columns_c: vec![43.0, 48.0, 53.0],
                    ratio_pct: graded_rows(&[85, 65, 45]),
                },
                HtdSetCfg {
                    select_min_c: Some(40.0),
                    enter_c: 40.0,
                    temp_columns_c: vec![40.0, 45.0, 50.0],
                    ratio_pct: graded_rows(&[80, 60, 40]),
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
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

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ImbalanceCfg {
    pub enabled: bool,
    pub sigma_level: u8,
    pub noise_floor_mv: u16,
    /// Samples to accumulate before analysis.
    pub min_sampling_time: u16,
    /// Cycles between accepted samples.
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

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NvmCfg {
    /// Image file holding the persisted region between runs.
    pub path: Option<String>,
    pub capacity_bytes: usize,
}

impl Default for NvmCfg {
    fn default() -> Self {
        Self {
            path: None,
            capacity_bytes: 4096,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pack: PackCfg,
    pub stages: Vec<StageCfg>,
    #[serde(default)]
    pub cv: CvCfg,
    #[serde(default)]
    pub temperature: TemperatureCfg,
    #[serde(default)]
    pub coefficients: CoefficientsCfg,
    #[serde(default)]
    pub tracking: TrackingCfg,
    #[serde(default)]
    pub current: CurrentCfg,
    /// Completion bands. Accepts either:
    /// - array of tables: [{ min_temp_c = -20.0, max_soc_pct = 75.0 }, ...]
    /// - array of tuples: [[-20.0, 75.0], [-15.0, 84.3], ...]
    #[serde(default = "default_completion", deserialize_with = "de_completion")]
    pub completion: Vec<CompletionBandCfg>,
    #[serde(default)]
    pub htd: HtdCfg,
    #[serde(default)]
    pub aging: AgingCfg,
    #[serde(default)]
    pub imbalance: ImbalanceCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub nvm: NvmCfg,
}

pub fn default_completion() -> Vec<CompletionBandCfg> {
    [
        (-20.0, 75.0),
        (-15.0, 84.3),
        (-10.0, 91.0),
        (-5.0, 95.3),
        (0.0, 97.0),
    ]
    .into_iter()
    .map(|(min_temp_c, max_soc_pct)| CompletionBandCfg {
        min_temp_c,
        max_soc_pct,
    })
    .collect()
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BandToml {
    Tuple((f32, f32)),
    Table { min_temp_c: f32, max_soc_pct: f32 },
}

fn de_completion<'de, D>(deserializer: D) -> Result<Vec<CompletionBandCfg>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<BandToml>> = Option::deserialize(deserializer)?;
    let Some(items) = opt else {
        return Ok(default_completion());
    };
    let mut out = Vec::with_capacity(items.len());
    for b in items {
        match b {
            BandToml::Tuple((min_temp_c, max_soc_pct)) => out.push(CompletionBandCfg {
                min_temp_c,
                max_soc_pct,
            }),
            BandToml::Table {
                min_temp_c,
                max_soc_pct,
            } => out.push(CompletionBandCfg {
                min_temp_c,
                max_soc_pct,
            }),
        }
    }
    Ok(out)
}

impl OcvTable {
    /// Build from CSV rows; SOC must be strictly increasing and within 0..=10000.
    pub fn from_rows(rows: &[OcvRow]) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("OCV curve requires at least two rows, got {}", rows.len());
        }
        for (i, w) in rows.windows(2).enumerate() {
            if w[1].soc_cpct <= w[0].soc_cpct {
                eyre::bail!(
                    "OCV rows must be strictly increasing in soc_cpct (rows {} and {})",
                    i,
                    i + 1
                );
            }
        }
        if let Some(last) = rows.last()
            && last.soc_cpct > 10_000
        {
            eyre::bail!("OCV soc_cpct must be <= 10000, got {}", last.soc_cpct);
        }
        Ok(Self {
            soc_cpct: rows.iter().map(|r| r.soc_cpct).collect(),
            ocv_mv: rows.iter().map(|r| r.ocv_mv).collect(),
        })
    }
}

impl TryFrom<&[OcvRow]> for OcvTable {
    type Error = eyre::Report;
    fn try_from(rows: &[OcvRow]) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

pub fn load_ocv_csv(path: &std::path::Path) -> eyre::Result<OcvTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open OCV CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["soc_cpct", "ocv_mv"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "OCV CSV must have headers 'soc_cpct,ocv_mv', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<OcvRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    OcvTable::from_rows(&rows)
}

fn check_pct(name: &str, v: f32) -> eyre::Result<()> {
    if !(0.0..=100.0).contains(&v) {
        eyre::bail!("{name} must be in [0.0, 100.0]");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pack
        if self.pack.cells == 0 || self.pack.cells > 192 {
            eyre::bail!("pack.cells must be in 1..=192");
        }
        if self.pack.sensors == 0 || self.pack.sensors > 64 {
            eyre::bail!("pack.sensors must be in 1..=64");
        }
        if !self.pack.cell_sensor.is_empty() {
            if self.pack.cell_sensor.len() != self.pack.cells {
                eyre::bail!("pack.cell_sensor must list one sensor per cell");
            }
            if let Some(i) = self
                .pack
                .cell_sensor
                .iter()
                .position(|&s| usize::from(s) >= self.pack.sensors)
            {
                eyre::bail!("pack.cell_sensor[{i}] names an unknown sensor");
            }
        }

        // Stages
        if self.stages.is_empty() || self.stages.len() > 32 {
            eyre::bail!("stages must list between 1 and 32 entries");
        }
        for (i, s) in self.stages.iter().enumerate() {
            check_pct(&format!("stages[{i}].soc_pct"), s.soc_pct)?;
            if s.min_ma > s.max_ma {
                eyre::bail!("stages[{i}].min_ma must be <= max_ma");
            }
            if s.max_ma > self.current.abs_max_ma {
                eyre::bail!("stages[{i}].max_ma exceeds current.abs_max_ma");
            }
        }
        for (i, w) in self.stages.windows(2).enumerate() {
            if w[1].soc_pct <= w[0].soc_pct {
                eyre::bail!("stages[{}].soc_pct must be > stages[{i}].soc_pct", i + 1);
            }
        }

        // CV
        if self.cv.rated_cell_mv == 0 {
            eyre::bail!("cv.rated_cell_mv must be > 0");
        }

        // Temperature
        let t = &self.temperature;
        if !(t.min_c < t.ref_c && t.ref_c < t.max_c) {
            eyre::bail!("temperature limits must satisfy min_c < ref_c < max_c");
        }
        if t.derate_span_c <= 0.0 {
            eyre::bail!("temperature.derate_span_c must be > 0.0");
        }

        // Coefficients
        let c = &self.coefficients;
        for (name, v) in [
            ("a", c.a),
            ("b", c.b),
            ("c", c.c),
            ("d", c.d),
            ("e", c.e),
            ("f", c.f),
            ("g", c.g),
            ("h", c.h),
        ] {
            if !v.is_finite() {
                eyre::bail!("coefficients.{name} must be finite");
            }
        }

        // Tracking
        if self.tracking.max_corr_idx == 0 {
            eyre::bail!("tracking.max_corr_idx must be >= 1");
        }
        if self.tracking.min_sampling_cycles == 0 {
            eyre::bail!("tracking.min_sampling_cycles must be >= 1");
        }
        check_pct(
            "tracking.session_reset_soc_drop_pct",
            self.tracking.session_reset_soc_drop_pct,
        )?;

        // Completion
        if self.completion.is_empty() {
            eyre::bail!("completion must list at least one band");
        }
        for (i, b) in self.completion.iter().enumerate() {
            check_pct(&format!("completion[{i}].max_soc_pct"), b.max_soc_pct)?;
        }
        if self
            .completion
            .windows(2)
            .any(|w| w[1].min_temp_c <= w[0].min_temp_c)
        {
            eyre::bail!("completion bands must be ascending in min_temp_c");
        }

        // HTD
        if self.htd.enabled {
            let h = &self.htd;
            if h.exit_hysteresis_c < 0.0 {
                eyre::bail!("htd.exit_hysteresis_c must be >= 0.0");
            }
            if h.soc_step_pct <= 0.0 {
                eyre::bail!("htd.soc_step_pct must be > 0.0");
            }
            if h.sets.is_empty() {
                eyre::bail!("htd.sets must have at least one set");
            }
            let keys: Vec<f32> = h
                .sets
                .iter()
                .map(|s| s.select_min_c.unwrap_or(f32::NEG_INFINITY))
                .collect();
            if keys.windows(2).any(|w| w[1] <= w[0]) {
                eyre::bail!("htd.sets must be ascending in select_min_c");
            }
            for (n, set) in h.sets.iter().enumerate() {
                if set.enter_c >= t.max_c {
                    eyre::bail!("htd.sets[{n}].enter_c must be below temperature.max_c");
                }
                if set.temp_columns_c.is_empty()
                    || set.temp_columns_c.windows(2).any(|w| w[1] <= w[0])
                {
                    eyre::bail!("htd.sets[{n}].temp_columns_c must be non-empty and ascending");
                }
                if set.ratio_pct.is_empty() {
                    eyre::bail!("htd.sets[{n}].ratio_pct must have at least one row");
                }
                for (i, row) in set.ratio_pct.iter().enumerate() {
                    if row.len() != set.temp_columns_c.len() {
                        eyre::bail!(
                            "htd.sets[{n}].ratio_pct[{i}] must have one entry per temperature column"
                        );
                    }
                    if row.iter().any(|&p| p > 100) {
                        eyre::bail!("htd.sets[{n}].ratio_pct[{i}] entries must be <= 100");
                    }
                }
            }
        }

        // Aging
        let a = &self.aging;
        if !(a.early_warning_corr_idx <= a.abnormal_corr_idx
            && a.abnormal_corr_idx <= a.extreme_corr_idx)
        {
            eyre::bail!("aging thresholds must satisfy early_warning <= abnormal <= extreme");
        }
        if a.eol_mitigations == 0 {
            eyre::bail!("aging.eol_mitigations must be >= 1");
        }

        // Imbalance
        if self.imbalance.enabled {
            if self.imbalance.min_sampling_time == 0 {
                eyre::bail!("imbalance.min_sampling_time must be >= 1");
            }
            if self.imbalance.threshold_for_valid_sample == 0 {
                eyre::bail!("imbalance.threshold_for_valid_sample must be >= 1");
            }
        }

        // NVM
        if self.nvm.capacity_bytes == 0 {
            eyre::bail!("nvm.capacity_bytes must be > 0");
        }

        Ok(())
    }
}
