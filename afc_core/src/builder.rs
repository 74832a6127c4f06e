//! Type-state builder for `ChargeSession`.
//!
//! The builder enforces at compile time that a parameter table and a
//! persisted region are provided before `build()` is available. The OCV curve
//! and event sink fall back to defaults.

use std::marker::PhantomData;

use afc_traits::{EventLog, PersistedRegion};

use crate::error::{ConfigError, Result};
use crate::eventlog::NullSink;
use crate::nvm;
use crate::ocv::OcvCurve;
use crate::params::ChargeParams;
use crate::session::ChargeSession;

// ── Type-state markers ───────────────────────────────────────────────────────

/// Placeholder for a required piece not yet supplied.
pub struct Missing;
pub struct Set;

/// Builder for `ChargeSession`. All fields are validated on `build()`.
pub struct ChargeSessionBuilder<R, L, P> {
    params: Option<ChargeParams>,
    ocv: Option<OcvCurve>,
    region: R,
    log: L,
    _p: PhantomData<P>,
}

impl Default for ChargeSessionBuilder<Missing, NullSink, Missing> {
    fn default() -> Self {
        Self {
            params: None,
            ocv: None,
            region: Missing,
            log: NullSink,
            _p: PhantomData,
        }
    }
}

impl ChargeSession<Missing, NullSink> {
    /// Start building a session.
    pub fn builder() -> ChargeSessionBuilder<Missing, NullSink, Missing> {
        ChargeSessionBuilder::default()
    }
}

impl<R, L, P> ChargeSessionBuilder<R, L, P> {
    pub fn with_params(self, params: ChargeParams) -> ChargeSessionBuilder<R, L, Set> {
        ChargeSessionBuilder {
            params: Some(params),
            ocv: self.ocv,
            region: self.region,
            log: self.log,
            _p: PhantomData,
        }
    }

    pub fn with_ocv_curve(mut self, ocv: OcvCurve) -> Self {
        self.ocv = Some(ocv);
        self
    }

    pub fn with_region<R2: PersistedRegion>(self, region: R2) -> ChargeSessionBuilder<R2, L, P> {
        ChargeSessionBuilder {
            params: self.params,
            ocv: self.ocv,
            region,
            log: self.log,
            _p: PhantomData,
        }
    }

    pub fn with_event_sink<L2: EventLog>(self, log: L2) -> ChargeSessionBuilder<R, L2, P> {
        ChargeSessionBuilder {
            params: self.params,
            ocv: self.ocv,
            region: self.region,
            log,
            _p: PhantomData,
        }
    }
}

/// Validate parameters against the region and construct the session.
///
/// Fails before anything is read from or written to the region.
fn validate_and_build<R: PersistedRegion, L: EventLog>(
    params: ChargeParams,
    ocv: OcvCurve,
    region: R,
    log: L,
) -> Result<ChargeSession<R, L>> {
    params.validate().map_err(eyre::Report::new)?;
    if ocv.len() < 2 {
        return Err(eyre::Report::new(ConfigError::OcvCurve(
            "at least two points required",
        )));
    }
    let needed = nvm::encoded_len(params.stage_count(), params.pack.cell_count);
    if region.capacity() < needed {
        return Err(eyre::Report::new(ConfigError::RegionTooSmall {
            needed,
            capacity: region.capacity(),
        }));
    }
    tracing::debug!(
        stages = params.stage_count(),
        cells = params.pack.cell_count,
        nvm_bytes = needed,
        "charge session parameters accepted"
    );
    Ok(ChargeSession::from_parts(params, ocv, region, log))
}

impl<R: PersistedRegion, L: EventLog> ChargeSessionBuilder<R, L, Set> {
    pub fn build(self) -> Result<ChargeSession<R, L>> {
        let params = self
            .params
            .ok_or_else(|| eyre::Report::new(ConfigError::Invalid("parameters not set")))?;
        validate_and_build(params, self.ocv.unwrap_or_default(), self.region, self.log)
    }
}
