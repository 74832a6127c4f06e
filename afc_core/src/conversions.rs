//! `From` implementations bridging `afc_config` types to `afc_core` types.
//!
//! Config values are human units (°C, %); the core works in 0.1 °C and 0.01 %.

use crate::params::{
    AgingCfg, ChargeParams, Coefficients, CompletionBand, CompletionCfg, CurrentLimits, CvParams,
    HtdCfg, HtdSet, ImbalanceCfg, PackLayout, StageParams, TempLimits, TrackingCfg,
};
use crate::units::{celsius_to_dc, pct_to_cpct};

// ── PackLayout ───────────────────────────────────────────────────────────────

impl From<&afc_config::PackCfg> for PackLayout {
    /// An empty `cell_sensor` spreads cells evenly over the sensors.
    fn from(c: &afc_config::PackCfg) -> Self {
        if c.cell_sensor.is_empty() {
            Self::even(c.cells, c.sensors)
        } else {
            Self {
                cell_count: c.cells,
                sensor_count: c.sensors,
                cell_sensor: c.cell_sensor.clone(),
            }
        }
    }
}

// ── StageParams ──────────────────────────────────────────────────────────────

impl From<&afc_config::StageCfg> for StageParams {
    fn from(c: &afc_config::StageCfg) -> Self {
        Self {
            soc_cpct: pct_to_cpct(c.soc_pct),
            max_ma: c.max_ma,
            min_ma: c.min_ma,
            step_ma: c.step_ma,
            ref_start_mv: c.ref_start_mv,
            ref_band_mv: c.ref_band_mv,
            sad_limit_mv: c.sad_limit_mv,
        }
    }
}

// ── CvParams ─────────────────────────────────────────────────────────────────

impl From<&afc_config::CvCfg> for CvParams {
    fn from(c: &afc_config::CvCfg) -> Self {
        Self {
            rated_cell_mv: c.rated_cell_mv,
            charge_ma: c.charge_ma,
            step_ma: c.step_ma,
        }
    }
}

// ── TempLimits ───────────────────────────────────────────────────────────────

impl From<&afc_config::TemperatureCfg> for TempLimits {
    fn from(c: &afc_config::TemperatureCfg) -> Self {
        Self {
            max_dc: celsius_to_dc(c.max_c),
            min_dc: celsius_to_dc(c.min_c),
            ref_dc: celsius_to_dc(c.ref_c),
            derate_span_dc: celsius_to_dc(c.derate_span_c),
        }
    }
}

impl From<&afc_config::CoefficientsCfg> for Coefficients {
    fn from(c: &afc_config::CoefficientsCfg) -> Self {
        Self {
            a: c.a,
            b: c.b,
            c: c.c,
            d: c.d,
            e: c.e,
            f: c.f,
            g: c.g,
            h: c.h,
        }
    }
}

// ── TrackingCfg ──────────────────────────────────────────────────────────────

impl From<&afc_config::TrackingCfg> for TrackingCfg {
    fn from(c: &afc_config::TrackingCfg) -> Self {
        Self {
            noise_floor_mv: c.noise_floor_mv,
            min_sampling_cycles: c.min_sampling_cycles,
            max_corr_idx: c.max_corr_idx,
            session_reset_soc_drop_cpct: pct_to_cpct(c.session_reset_soc_drop_pct),
            save_period_cycles: c.save_period_cycles,
            save_on_correction: c.save_on_correction,
        }
    }
}

impl From<&afc_config::CurrentCfg> for CurrentLimits {
    fn from(c: &afc_config::CurrentCfg) -> Self {
        Self {
            abs_max_ma: c.abs_max_ma,
            overcurrent_margin_ma: c.overcurrent_margin_ma,
            undercurrent_margin_ma: c.undercurrent_margin_ma,
            slew_up_ma_per_cycle: c.slew_up_ma_per_cycle,
        }
    }
}

// ── CompletionCfg ────────────────────────────────────────────────────────────

impl From<&[afc_config::CompletionBandCfg]> for CompletionCfg {
    fn from(bands: &[afc_config::CompletionBandCfg]) -> Self {
        Self {
            bands: bands
                .iter()
                .map(|b| CompletionBand {
                    min_temp_dc: celsius_to_dc(b.min_temp_c),
                    max_soc_cpct: pct_to_cpct(b.max_soc_pct),
                })
                .collect(),
        }
    }
}

// ── HtdCfg ───────────────────────────────────────────────────────────────────

impl From<&afc_config::HtdCfg> for HtdCfg {
    fn from(c: &afc_config::HtdCfg) -> Self {
        Self {
            enabled: c.enabled,
            exit_hysteresis_dc: celsius_to_dc(c.exit_hysteresis_c),
            soc_step_cpct: pct_to_cpct(c.soc_step_pct),
            sets: c.sets.iter().map(HtdSet::from).collect(),
        }
    }
}

impl From<&afc_config::HtdSetCfg> for HtdSet {
    fn from(c: &afc_config::HtdSetCfg) -> Self {
        Self {
            select_min_dc: c.select_min_c.map_or(i16::MIN, celsius_to_dc),
            enter_dc: celsius_to_dc(c.enter_c),
            temp_columns_dc: c.temp_columns_c.iter().map(|&t| celsius_to_dc(t)).collect(),
            ratio_pct: c.ratio_pct.clone(),
        }
    }
}

impl From<&afc_config::AgingCfg> for AgingCfg {
    fn from(c: &afc_config::AgingCfg) -> Self {
        Self {
            early_warning_corr_idx: c.early_warning_corr_idx,
            abnormal_corr_idx: c.abnormal_corr_idx,
            extreme_corr_idx: c.extreme_corr_idx,
            eol_mitigations: c.eol_mitigations,
            mitigation_cap_per_stage: c.mitigation_cap_per_stage,
        }
    }
}

impl From<&afc_config::ImbalanceCfg> for ImbalanceCfg {
    fn from(c: &afc_config::ImbalanceCfg) -> Self {
        Self {
            enabled: c.enabled,
            sigma_level: c.sigma_level,
            noise_floor_mv: c.noise_floor_mv,
            min_sampling_time: c.min_sampling_time,
            threshold_for_valid_sample: c.threshold_for_valid_sample,
        }
    }
}

// ── ChargeParams ─────────────────────────────────────────────────────────────

impl From<&afc_config::Config> for ChargeParams {
    fn from(c: &afc_config::Config) -> Self {
        Self {
            pack: PackLayout::from(&c.pack),
            stages: c.stages.iter().map(StageParams::from).collect(),
            cv: CvParams::from(&c.cv),
            temp: TempLimits::from(&c.temperature),
            coeffs: Coefficients::from(&c.coefficients),
            tracking: TrackingCfg::from(&c.tracking),
            current: CurrentLimits::from(&c.current),
            completion: CompletionCfg::from(c.completion.as_slice()),
            htd: HtdCfg::from(&c.htd),
            aging: AgingCfg::from(&c.aging),
            imbalance: ImbalanceCfg::from(&c.imbalance),
        }
    }
}
