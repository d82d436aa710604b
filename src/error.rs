use std::num::ParseIntError;

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Play(#[from] PlayError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Failures surfaced while loading and compiling a Play (schema, registry, DAGs).
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("Play schema validation failed at '{path}': {msg}")]
    SchemaError { path: String, msg: String },

    #[error("deprecated key '{key}' is no longer supported: {hint}")]
    Deprecated { key: String, hint: String },

    #[error("unknown indicator type '{0}' (not in registry)")]
    UnknownIndicator(String),

    #[error("unknown structure type '{0}' (not in registry)")]
    UnknownStructure(String),

    #[error("structure '{key}' declares dependency '{uses}' which is not defined earlier in role '{role}'")]
    DependencyError {
        key: String,
        uses: String,
        role: String,
    },

    #[error("cyclic setup reference detected: {cycle}")]
    CyclicSetup { cycle: String },

    #[error("cyclic structure dependency detected: {cycle}")]
    CyclicStructure { cycle: String },

    #[error("invalid timeframe string '{0}'")]
    InvalidTimeframe(String),

    #[error("timeframe hierarchy violated: low_tf ({low}m) must be <= med_tf ({med}m) <= high_tf ({high}m)")]
    TimeframeHierarchy { low: u32, med: u32, high: u32 },

    #[error("reference '{path}' resolves to unknown feature/structure id")]
    UnresolvedReference { path: String },

    #[error("'==' / '!=' not allowed on float-typed reference '{0}'; use near_pct/near_abs")]
    InvalidEqualityOnFloat(String),

    #[error("window bars {bars} exceeds cap of 500 after anchor-tf normalization")]
    WindowTooLarge { bars: u32 },

    #[error("window duration {minutes}m exceeds cap of 1440m")]
    WindowDurationTooLarge { minutes: u32 },

    #[error("reserved flag '{0}' must remain false")]
    ReservedFlagSet(String),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("template variable '{0}' referenced but not declared in `variables:`")]
    UndeclaredVariable(String),
}

/// Failures related to historical data coverage and provider contract violations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("coverage gap for {symbol} {tf} in [{start_ms}, {end_ms}]")]
    CoverageError {
        symbol: String,
        tf: String,
        start_ms: i64,
        end_ms: i64,
    },

    #[error("data provider returned bar out of monotonic order at ts_open={ts_open}")]
    NonMonotonicBar { ts_open: i64 },

    #[error("data provider returned duplicate bar at ts_open={ts_open}")]
    DuplicateBar { ts_open: i64 },

    #[error("bar ts_open {ts_open} is not aligned to timeframe {tf} boundary")]
    MisalignedBar { ts_open: i64, tf: String },

    #[error("invalid symbol string: '{0}'")]
    InvalidSymbol(String),

    #[error("failed to parse integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("failed to parse float: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("failed to parse enum: {0}")]
    ParseEnum(#[from] strum::ParseError),

    #[error("empty bar stream: {0}")]
    EmptyStream(String),
}

/// Failures that compromise ledger/accounting integrity mid-simulation. Every
/// variant here aborts the run per the error propagation policy: nothing here
/// is recoverable the way `ComputationMissing` (modeled as `Option`, not an
/// error) is.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(
        "ledger invariant violated at exec_idx={exec_idx} ts_close={ts_close}: {detail}"
    )]
    InvariantError {
        exec_idx: u64,
        ts_close: i64,
        detail: String,
    },

    #[error("equity floor breached at exec_idx={exec_idx} ts_close={ts_close}: equity={equity}")]
    EquityFloor {
        exec_idx: u64,
        ts_close: i64,
        equity: f64,
    },

    #[error("order '{id}' rejected: {reason}")]
    OrderRejected { id: u64, reason: String },

    #[error("risk policy rejected entry at exec_idx={exec_idx}: {reason}")]
    RiskRejected { exec_idx: u64, reason: String },

    #[error("price ordering invalid for {side:?} trade: {detail}")]
    InvalidPriceOrdering { side: String, detail: String },
}

/// Failures writing or verifying deterministic run artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to hash manifest: {0}")]
    Hashing(String),

    #[error("failed to write artifact '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet serialization failed: {0}")]
    Parquet(String),

    #[error("determinism verification failed: run {lhs} and run {rhs} disagree on {artifact} hash")]
    DeterminismMismatch {
        lhs: usize,
        rhs: usize,
        artifact: String,
    },
}

/// Failures loading process-wide engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Invalid(String),

    #[error("failed to parse duration '{0}'")]
    Duration(#[from] humantime::DurationError),
}

/// File I/O and serialization failures not specific to artifacts.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("failed to build object store: {0}")]
    ObjectStoreBuild(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
}
