//! Validation harness (§4.O): runs many Plays concurrently against a shared,
//! read-only historical data provider, one engine instance per Play. Plays
//! never share mutable state — each gets its own `CompiledPlay`,
//! `SimulatedExchange`, and `FeedStore` — so the only cross-task sharing is
//! the provider itself, which is `Sync` by contract (§4.C.1).

use std::collections::HashMap;

use rayon::prelude::*;

use crate::engine::{run_play, RunOutcome};
use crate::error::EngineResult;
use crate::provider::HistoricalDataProvider;

/// One Play's inputs to a harness batch: its raw YAML, the variable bindings
/// it was loaded with, and the window it should be run over.
pub struct HarnessTask {
    pub label: String,
    pub raw_yaml: String,
    pub variables: HashMap<String, String>,
    pub start_ms: i64,
    pub end_ms: i64,
}

pub struct HarnessResult {
    pub label: String,
    pub outcome: EngineResult<RunOutcome>,
}

/// Runs every task in `tasks` against `provider`, in parallel, capped at
/// `max_concurrent` simultaneous Plays (§3.12's `max_concurrent_runs`).
/// Provider must be `Sync`: it is read-only and shared across every worker.
pub struct ValidationHarness<'p> {
    provider: &'p dyn HistoricalDataProvider,
    max_concurrent: usize,
}

impl<'p> ValidationHarness<'p> {
    pub fn new(provider: &'p dyn HistoricalDataProvider, max_concurrent: usize) -> Self {
        Self { provider, max_concurrent: max_concurrent.max(1) }
    }

    /// Runs every task and returns results in the same order the tasks were
    /// given, regardless of completion order. A single Play's failure does
    /// not abort the batch — its `outcome` carries the error.
    pub fn run_all(&self, tasks: Vec<HarnessTask>) -> Vec<HarnessResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_concurrent)
            .build()
            .expect("thread pool with a positive thread count always builds");

        pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let outcome =
                        run_play(&task.raw_yaml, task.variables, self.provider, task.start_ms, task.end_ms);
                    HarnessResult { label: task.label, outcome }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{generate_synthetic, StaticProvider, SyntheticPattern};
    use crate::time::Timeframe;

    fn play_yaml(fast: u32, slow: u32) -> String {
        format!(
            r#"
name: test
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  exec: med
account:
  starting_equity: 10000
features:
  ema_fast:
    indicator_type: ema
    length: {fast}
  ema_slow:
    indicator_type: ema
    length: {slow}
actions:
  enter_long: ["ema_fast", "cross_above", "ema_slow"]
risk:
  leverage: 1
  max_leverage: 1
"#
        )
    }

    #[test]
    fn runs_multiple_plays_concurrently_and_preserves_order() {
        let bars_1m = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M1, 1, 20_000, 0);
        let bars_15m = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M15, 1, 2_000, 0);
        let provider = StaticProvider::new()
            .with_series("BTCUSDT", Timeframe::M1, bars_1m)
            .with_series("BTCUSDT", Timeframe::M15, bars_15m);

        let tasks = vec![
            HarnessTask {
                label: "fast_3_5".into(),
                raw_yaml: play_yaml(3, 5),
                variables: HashMap::new(),
                start_ms: 2 * 24 * 3_600_000,
                end_ms: 4 * 24 * 3_600_000,
            },
            HarnessTask {
                label: "fast_5_9".into(),
                raw_yaml: play_yaml(5, 9),
                variables: HashMap::new(),
                start_ms: 2 * 24 * 3_600_000,
                end_ms: 4 * 24 * 3_600_000,
            },
        ];

        let harness = ValidationHarness::new(&provider, 2);
        let results = harness.run_all(tasks);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label, "fast_3_5");
        assert_eq!(results[1].label, "fast_5_9");
        for r in &results {
            assert!(r.outcome.is_ok(), "{} failed: {:?}", r.label, r.outcome.as_ref().err());
        }
    }
}
