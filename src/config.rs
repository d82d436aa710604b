//! Engine configuration (§3.12): process-wide knobs independent of any
//! single Play — artifact root, invariant-check cadence, snapshot path
//! cache size, validation-harness concurrency, and the default tie-break
//! for same-bar fills. Loaded once per process, serialized with `serde`
//! the same way the rest of the engine's typed configuration is.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EngineResult};

/// Default tie-break when an exec bar's signal and the exchange's own
/// TP/SL/liquidation path could both be said to apply first; the exchange
/// (§4.H) already has an explicit `ExitMode` per Play — this only governs
/// ambiguity the Play itself doesn't resolve (e.g. two intents emitted in
/// the same 1m step before risk policy runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionBias {
    /// Favor the exchange's own settlement order (funding/TP-SL/liquidation
    /// before strategy evaluation, per §4.J's ordering rule).
    SettlementFirst,
    /// Favor whichever the strategy emitted first this step.
    SignalFirst,
}

impl Default for ExecutionBias {
    fn default() -> Self {
        ExecutionBias::SettlementFirst
    }
}

/// Whether ledger invariants (§4.H) are checked every 1-minute step or only
/// once per exec-bar close. Checking every step is the correct default in
/// debug builds; release builds default to bar-close to keep the hot loop
/// cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantCheckCadence {
    EveryMinute,
    EveryBarClose,
}

impl Default for InvariantCheckCadence {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            InvariantCheckCadence::EveryMinute
        } else {
            InvariantCheckCadence::EveryBarClose
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory runs are written under (§6.3 artifact layout).
    pub artifact_root: PathBuf,
    pub invariant_check_cadence: InvariantCheckCadence,
    /// Capacity of the snapshot path-tokenization LRU (§4.E), default 1024.
    pub snapshot_path_cache_size: usize,
    /// Max concurrent Plays a `ValidationHarness` (§4.O) may run at once.
    pub max_concurrent_runs: usize,
    pub default_execution_bias: ExecutionBias,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("runs"),
            invariant_check_cadence: InvariantCheckCadence::default(),
            snapshot_path_cache_size: 1024,
            max_concurrent_runs: 4,
            default_execution_bias: ExecutionBias::default(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_str(s: &str) -> EngineResult<Self> {
        serde_yaml::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()).into())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.snapshot_path_cache_size == 0 {
            return Err(ConfigError::Invalid("snapshot_path_cache_size must be > 0".into()).into());
        }
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_runs must be > 0".into()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_cache_size() {
        let mut cfg = EngineConfig::default();
        cfg.snapshot_path_cache_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_from_yaml() {
        let yaml = "artifact_root: /tmp/runs\ninvariant_check_cadence: EveryBarClose\nsnapshot_path_cache_size: 2048\nmax_concurrent_runs: 8\ndefault_execution_bias: SignalFirst\n";
        let cfg = EngineConfig::load_from_str(yaml).unwrap();
        assert_eq!(cfg.max_concurrent_runs, 8);
    }
}
