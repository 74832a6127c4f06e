//! Session assembly and the `replay`, `check` and `inspect-nvm` commands.

use std::path::{Path, PathBuf};

use afc_core::nvm::{self, PersistedState};
use afc_core::{ChargeParams, ChargeSession, CycleOutputs, OcvCurve, RingLog};
use afc_traits::{MemRegion, PersistedRegion};
use eyre::WrapErr;
use serde_json::json;

use crate::region::FileRegion;
use crate::trace::load_trace_csv;

pub type Session = ChargeSession<Box<dyn PersistedRegion>, RingLog>;

/// Read and validate the config TOML.
pub fn load_config(path: &Path) -> eyre::Result<afc_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg: afc_config::Config = toml::from_str(&text)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

fn load_ocv(path: Option<&Path>) -> eyre::Result<OcvCurve> {
    let Some(path) = path else {
        return Ok(OcvCurve::default());
    };
    let table = afc_config::load_ocv_csv(path)?;
    OcvCurve::new(table.soc_cpct, table.ocv_mv).map_err(eyre::Report::new)
}

fn nvm_path(cfg: &afc_config::Config, cli: Option<&Path>) -> Option<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| cfg.nvm.path.as_ref().map(PathBuf::from))
}

/// Build a session over the NVM image file, or over memory if none is configured.
pub fn build_session(
    cfg: &afc_config::Config,
    ocv: Option<&Path>,
    nvm: Option<&Path>,
) -> eyre::Result<Session> {
    let params = ChargeParams::from(cfg);
    let region: Box<dyn PersistedRegion> = match nvm_path(cfg, nvm) {
        Some(p) => {
            tracing::info!(path = %p.display(), "using NVM image file");
            Box::new(FileRegion::new(p, cfg.nvm.capacity_bytes))
        }
        None => Box::new(MemRegion::new(cfg.nvm.capacity_bytes)),
    };
    ChargeSession::builder()
        .with_params(params)
        .with_ocv_curve(load_ocv(ocv)?)
        .with_region(region)
        .with_event_sink(RingLog::default())
        .build()
}

fn cycle_json(cycle: usize, stage: usize, out: &CycleOutputs) -> serde_json::Value {
    json!({
        "cycle": cycle,
        "stage": stage,
        "charge_current_ma": out.charge_current_ma,
        "pack_voltage_mv": out.pack_voltage_mv,
        "error_flags": out.error_flags,
        "complete": out.complete,
        "max_reference_current_ma": out.max_reference_current_ma,
        "mitigated_current_ma": out.mitigated_current_ma,
        "aging": {
            "early_warning": out.aging.early_warning_aging,
            "abnormal": out.aging.abnormal_aging,
            "extreme": out.aging.extreme_aging,
            "end_of_life": out.aging.end_of_life,
            "soc_imbalance": out.aging.soc_imbalance,
        },
    })
}

fn print_cycle(json_mode: bool, cycle: usize, stage: usize, out: &CycleOutputs) {
    if json_mode {
        println!("{}", cycle_json(cycle, stage, out));
    } else {
        println!(
            "cycle={cycle:>5} stage={stage:>2} current_ma={:>6} pack_mv={:>6} flags={:#010x}{}",
            out.charge_current_ma,
            out.pack_voltage_mv,
            out.error_flags,
            if out.complete { " complete" } else { "" }
        );
    }
}

/// Options for `replay`.
#[derive(Debug, Clone)]
pub struct ReplayOpts<'a> {
    pub trace: &'a Path,
    pub ocv: Option<&'a Path>,
    pub nvm: Option<&'a Path>,
    pub every: usize,
    pub save: bool,
    pub json: bool,
}

pub fn run_replay(cfg: &afc_config::Config, opts: &ReplayOpts<'_>) -> eyre::Result<()> {
    let trace = load_trace_csv(opts.trace)?;
    let mut session = build_session(cfg, opts.ocv, opts.nvm)?;
    let every = opts.every.max(1);
    tracing::info!(cycles = trace.len(), "replay start");

    let mut completed_at = None;
    for (i, inputs) in trace.iter().enumerate() {
        let out = session.set_inputs(inputs);
        if out.complete && completed_at.is_none() {
            completed_at = Some(i);
        }
        if i % every == 0 || i + 1 == trace.len() {
            print_cycle(opts.json, i, session.present_stage(), &out);
        }
    }

    if opts.save {
        session.save_nvm()?;
    }

    let state = session.persisted();
    if opts.json {
        println!(
            "{}",
            json!({
                "summary": {
                    "cycles": trace.len(),
                    "completed_at": completed_at,
                    "stage": session.present_stage(),
                    "charge_cycles": state.cycles.count,
                    "total_mitigations": state.total_mitigations,
                    "end_of_life": state.end_of_life,
                    "events": session.event_log().len(),
                    "saved": opts.save,
                }
            })
        );
    } else {
        println!(
            "replayed {} cycles; stage {}; charge cycles {}; mitigations {}; events {}{}",
            trace.len(),
            session.present_stage(),
            state.cycles.count,
            state.total_mitigations,
            session.event_log().len(),
            match completed_at {
                Some(c) => format!("; complete at cycle {c}"),
                None => String::new(),
            }
        );
    }
    tracing::info!(cycles = trace.len(), ?completed_at, "replay done");
    Ok(())
}

pub fn run_check(cfg: &afc_config::Config, ocv: Option<&Path>, json_mode: bool) -> eyre::Result<()> {
    let params = ChargeParams::from(cfg);
    params.validate().map_err(eyre::Report::new)?;
    let curve = load_ocv(ocv)?;
    let nvm_bytes = nvm::encoded_len(params.stage_count(), params.pack.cell_count);
    if nvm_bytes > cfg.nvm.capacity_bytes {
        return Err(eyre::Report::new(afc_core::ConfigError::RegionTooSmall {
            needed: nvm_bytes,
            capacity: cfg.nvm.capacity_bytes,
        }));
    }
    if json_mode {
        println!(
            "{}",
            json!({
                "ok": true,
                "stages": params.stage_count(),
                "cells": params.pack.cell_count,
                "sensors": params.pack.sensor_count,
                "ocv_points": curve.len(),
                "nvm_bytes": nvm_bytes,
            })
        );
    } else {
        println!(
            "config OK: {} stages, {} cells, {} sensors, {} OCV points, NVM image {} bytes",
            params.stage_count(),
            params.pack.cell_count,
            params.pack.sensor_count,
            curve.len(),
            nvm_bytes
        );
    }
    Ok(())
}

pub fn run_inspect_nvm(
    cfg: &afc_config::Config,
    nvm: Option<&Path>,
    json_mode: bool,
) -> eyre::Result<()> {
    let params = ChargeParams::from(cfg);
    let Some(path) = nvm_path(cfg, nvm) else {
        eyre::bail!("no NVM image given: pass --nvm or set [nvm] path");
    };
    let image = FileRegion::new(&path, cfg.nvm.capacity_bytes)
        .load_image()
        .wrap_err_with(|| format!("read NVM image {}", path.display()))?;
    let state = PersistedState::decode(&image, params.stage_count(), params.pack.cell_count)
        .map_err(eyre::Report::new)
        .wrap_err_with(|| format!("decode NVM image {}", path.display()))?;

    if json_mode {
        println!(
            "{}",
            json!({
                "charge_cycles": state.cycles.count,
                "soc_accum_cpct": state.cycles.soc_accum_cpct,
                "prev_soc_cpct": state.cycles.prev_soc_cpct,
                "total_mitigations": state.total_mitigations,
                "end_of_life": state.end_of_life,
                "highest_corr_idx": state.highest_corr_idx,
                "corr_idx": state.corr_idx,
                "ref_mv": state.ref_mv,
            })
        );
    } else {
        println!(
            "charge cycles {} (accum {} cpct, prev SOC {} cpct)",
            state.cycles.count, state.cycles.soc_accum_cpct, state.cycles.prev_soc_cpct
        );
        println!(
            "total mitigations {}{}",
            state.total_mitigations,
            if state.end_of_life { " (end of life)" } else { "" }
        );
        println!("highest correction index per stage: {:?}", state.highest_corr_idx);
        for (cell, (idx, r)) in state.corr_idx.iter().zip(&state.ref_mv).enumerate() {
            println!("cell {cell:>3}: corr_idx {idx:>2} ref {r} mV");
        }
    }
    Ok(())
}
