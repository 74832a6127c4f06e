#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Adaptive multi-stage charge controller (hardware-agnostic).
//!
//! This crate computes the commanded charge current for a multi-cell pack
//! once per control cycle. Persisted state goes through
//! `afc_traits::PersistedRegion` and diagnostic records through
//! `afc_traits::EventLog`; the core performs no I/O of its own.
//!
//! ## Architecture
//!
//! - **Parameters**: Immutable per-session table (`params` module)
//! - **Compensation**: Temperature and current ratios, compensated voltages (`compensation`)
//! - **Tracking**: Per-cell correction indices and the monotonic stage index (`tracker`)
//! - **Safety**: Range checks, derating, HTD tier, completion (`safety`)
//! - **Bookkeeping**: Charge cycles, aging, voltage imbalance (`cycles`, `aging`, `imbalance`)
//! - **Persistence**: Little-endian image with CRC (`nvm`)
//! - **Facade**: `ChargeSession::set_inputs`, built with `ChargeSession::builder()`
//!
//! ## Integer Units
//!
//! Internals use mA, mV, 0.1 °C and 0.01 % SOC so a cycle is deterministic
//! for identical inputs. See `units`.

pub mod aging;
pub mod builder;
pub mod compensation;
pub mod conversions;
pub mod cycles;
pub mod diag;
pub mod error;
pub mod eventlog;
pub mod flags;
pub mod imbalance;
pub mod inputs;
pub mod mocks;
pub mod nvm;
pub mod ocv;
pub mod params;
pub mod safety;
pub mod session;
pub mod tracker;
pub mod units;

pub use builder::{ChargeSessionBuilder, Missing, Set};
pub use error::{AfcError, ConfigError, NvmError, Result};
pub use eventlog::{NullSink, RingLog};
pub use flags::{AgingFlags, AgingStatus, ErrorFlags};
pub use inputs::CycleInputs;
pub use ocv::OcvCurve;
pub use params::ChargeParams;
pub use session::{ChargeSession, CycleOutputs};

/// Parse, validate and convert a TOML config into a parameter table.
pub fn params_from_toml(s: &str) -> Result<ChargeParams> {
    use eyre::WrapErr;
    let cfg = afc_config::load_toml(s).wrap_err("parse config TOML")?;
    cfg.validate()?;
    let params = ChargeParams::from(&cfg);
    params.validate().map_err(eyre::Report::new)?;
    Ok(params)
}
