use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AfcError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("persisted region error: {0}")]
    Persistence(String),
    #[error("invalid state: {0}")]
    State(String),
}

/// Malformed parameter table. Fatal: prevents the session from starting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("stage count {0} outside 1..={max}", max = crate::params::MAX_STAGES)]
    StageCount(usize),
    #[error("stage {stage}: min current exceeds max current")]
    MinExceedsMax { stage: usize },
    #[error("stage {stage}: SOC threshold not strictly increasing")]
    SocNotIncreasing { stage: usize },
    #[error("stage {stage}: SOC threshold above 100%")]
    SocOutOfRange { stage: usize },
    #[error("stage {stage}: max current above the absolute current limit")]
    AboveAbsoluteMax { stage: usize },
    #[error("cell count {0} outside 1..={max}", max = crate::params::MAX_CELLS)]
    CellCount(usize),
    #[error("sensor count {0} outside 1..={max}", max = crate::params::MAX_TEMP_SENSORS)]
    SensorCount(usize),
    #[error("cell {cell}: sensor mapping missing or out of range")]
    SensorMapping { cell: usize },
    #[error("temperature limits must satisfy min < ref < max")]
    TempLimits,
    #[error("coefficient {0} is not finite")]
    NonFiniteCoefficient(&'static str),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
    #[error("OCV curve: {0}")]
    OcvCurve(&'static str),
    #[error("persisted state needs {needed} bytes, region holds {capacity}")]
    RegionTooSmall { needed: usize, capacity: usize },
}

/// Reasons a persisted image is rejected on load.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NvmError {
    #[error("region is erased")]
    Erased,
    #[error("region read failed")]
    ReadFailed,
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    #[error("unsupported layout version {0}")]
    VersionMismatch(u8),
    #[error("stage count mismatch: stored {stored}, expected {expected}")]
    StageCountMismatch { stored: usize, expected: usize },
    #[error("cell count mismatch: stored {stored}, expected {expected}")]
    CellCountMismatch { stored: usize, expected: usize },
    #[error("image truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("checksum mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    CrcMismatch { stored: u16, computed: u16 },
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
