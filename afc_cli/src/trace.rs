//! Trace CSV: one control cycle per row.
//!
//! Expected headers:
//! pack_current_ma,soc_cpct,capacity_mah,evse_present,evse_limit_ma,min_temp_dc,max_temp_dc,cells_mv,temps_dc
//!
//! Scalar columns left empty are stale for that cycle. `cells_mv` and
//! `temps_dc` are `;`-separated lists in which an empty entry is a stale
//! reading, e.g. `3801;;3799;3800`.

use std::path::Path;
use std::str::FromStr;

use afc_core::CycleInputs;
use eyre::WrapErr;
use serde::Deserialize;

const HEADERS: [&str; 9] = [
    "pack_current_ma",
    "soc_cpct",
    "capacity_mah",
    "evse_present",
    "evse_limit_ma",
    "min_temp_dc",
    "max_temp_dc",
    "cells_mv",
    "temps_dc",
];

#[derive(Debug, Deserialize)]
struct TraceRow {
    pack_current_ma: Option<i32>,
    soc_cpct: Option<u16>,
    capacity_mah: Option<u32>,
    evse_present: bool,
    evse_limit_ma: Option<u32>,
    min_temp_dc: Option<i16>,
    max_temp_dc: Option<i16>,
    cells_mv: String,
    temps_dc: String,
}

fn parse_list<T: FromStr>(field: &str, s: &str) -> eyre::Result<Vec<Option<T>>>
where
    T::Err: std::fmt::Display,
{
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .map(str::trim)
        .enumerate()
        .map(|(i, item)| {
            if item.is_empty() {
                Ok(None)
            } else {
                item.parse::<T>()
                    .map(Some)
                    .map_err(|e| eyre::eyre!("{field}[{i}] = {item:?}: {e}"))
            }
        })
        .collect()
}

impl TraceRow {
    fn into_inputs(self) -> eyre::Result<CycleInputs> {
        Ok(CycleInputs {
            pack_current_ma: self.pack_current_ma,
            cell_mv: parse_list("cells_mv", &self.cells_mv)?,
            temps_dc: parse_list("temps_dc", &self.temps_dc)?,
            min_temp_dc: self.min_temp_dc,
            max_temp_dc: self.max_temp_dc,
            capacity_mah: self.capacity_mah,
            soc_cpct: self.soc_cpct,
            evse_present: self.evse_present,
            evse_limit_ma: self.evse_limit_ma,
        })
    }
}

/// Read the whole trace into per-cycle inputs.
pub fn load_trace_csv(path: &Path) -> eyre::Result<Vec<CycleInputs>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("open trace CSV {}", path.display()))?;

    let headers = rdr
        .headers()
        .wrap_err_with(|| format!("read trace headers {}", path.display()))?
        .clone();
    let actual: Vec<&str> = headers.iter().collect();
    if actual != HEADERS {
        eyre::bail!(
            "trace CSV must have headers '{}', got: {}",
            HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut cycles = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        let row = rec.wrap_err_with(|| format!("invalid trace row {}", idx + 2))?;
        let inputs = row
            .into_inputs()
            .wrap_err_with(|| format!("invalid trace row {}", idx + 2))?;
        cycles.push(inputs);
    }
    Ok(cycles)
}
