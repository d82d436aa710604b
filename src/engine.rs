//! Top-level orchestration: compiles a Play, preflights it against a
//! provider, runs the bar processor, computes metrics, and writes artifacts.
//! Everything else in this crate is a component; this is the pipeline that
//! wires them together the way a caller actually invokes the engine.

use std::collections::HashMap;

use crate::artifacts::{self, DeterminismReport, Manifest};
use crate::bar_processor::{run_bar_processor, RunReport};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::metrics::MetricsRecord;
use crate::play::{load_play, CompiledPlay};
use crate::preflight::run_preflight;
use crate::provider::HistoricalDataProvider;

/// Everything produced by one full run of one Play over one data window.
pub struct RunOutcome {
    pub report: RunReport,
    pub metrics: MetricsRecord,
    pub manifest: Manifest,
}

/// Compiles `raw_yaml` into a Play, preflights it against `provider` over
/// `[start_ms, end_ms]`, runs the bar processor, and computes metrics.
/// Does not write artifacts — see [`run_and_write`] for that.
pub fn run_play(
    raw_yaml: &str,
    variables: HashMap<String, String>,
    provider: &dyn HistoricalDataProvider,
    start_ms: i64,
    end_ms: i64,
) -> EngineResult<RunOutcome> {
    let play = load_play(raw_yaml, variables)?;
    run_compiled_play(play, provider, start_ms, end_ms)
}

/// Same as [`run_play`] but takes an already-compiled Play, for callers
/// (e.g. the validation harness) that compile once and run repeatedly.
pub fn run_compiled_play(
    play: CompiledPlay,
    provider: &dyn HistoricalDataProvider,
    start_ms: i64,
    end_ms: i64,
) -> EngineResult<RunOutcome> {
    let play_hash = blake3::hash(play.name.as_bytes()).to_hex().to_string();
    let play_name = play.name.clone();
    let symbol = play.symbol.clone();
    let exec_tf_minutes = play.exec_tf.tf_minutes();

    let preflight = run_preflight(&play, provider, start_ms, end_ms)?;
    let sim_start_idx = preflight.sim_start_idx;
    let sim_end_idx = preflight.feed.exec.len().saturating_sub(1);

    let report = run_bar_processor(play, preflight.feed, sim_start_idx)?;
    let metrics = crate::metrics::compute_metrics(&report, exec_tf_minutes);

    let manifest = Manifest {
        play_name,
        play_hash,
        pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
        symbol,
        bar_range_start_ms: start_ms,
        bar_range_end_ms: end_ms,
        sim_start_idx,
        sim_end_idx,
        seed: None,
        generated_at_ms: 0,
    };

    Ok(RunOutcome { report, metrics, manifest })
}

/// Runs a Play and persists the full §6.3 artifact set under
/// `cfg.artifact_root`, returning the directory the run was written to.
pub fn run_and_write(
    raw_yaml: &str,
    variables: HashMap<String, String>,
    provider: &dyn HistoricalDataProvider,
    start_ms: i64,
    end_ms: i64,
    cfg: &EngineConfig,
) -> EngineResult<std::path::PathBuf> {
    let outcome = run_play(raw_yaml, variables, provider, start_ms, end_ms)?;
    artifacts::write_run_artifacts(
        &cfg.artifact_root,
        &outcome.manifest.play_name,
        &outcome.manifest.symbol,
        &outcome.manifest,
        &outcome.report,
        &outcome.metrics,
    )
}

/// Re-runs the same Play over the same data `n_runs` times and confirms the
/// resulting artifact hashes are identical (§4.N).
pub fn verify_play_determinism(
    raw_yaml: &str,
    variables: HashMap<String, String>,
    provider: &dyn HistoricalDataProvider,
    start_ms: i64,
    end_ms: i64,
    n_runs: usize,
) -> EngineResult<DeterminismReport> {
    artifacts::verify_determinism(
        || {
            let outcome = run_play(raw_yaml, variables.clone(), provider, start_ms, end_ms)?;
            Ok((outcome.manifest, outcome.report, outcome.metrics))
        },
        n_runs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{generate_synthetic, StaticProvider, SyntheticPattern};
    use crate::time::Timeframe;

    fn minimal_play_yaml() -> &'static str {
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
    length: 3
  ema_slow:
    indicator_type: ema
    length: 5
actions:
  enter_long: ["ema_fast", "cross_above", "ema_slow"]
risk:
  leverage: 1
  max_leverage: 1
"#
    }

    fn provider_with_data() -> StaticProvider {
        let bars_1m = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M1, 1, 20_000, 0);
        let bars_15m = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M15, 1, 2_000, 0);
        StaticProvider::new()
            .with_series("BTCUSDT", Timeframe::M1, bars_1m)
            .with_series("BTCUSDT", Timeframe::M15, bars_15m)
    }

    #[test]
    fn runs_a_play_end_to_end_and_produces_metrics() {
        let provider = provider_with_data();
        let outcome = run_play(
            minimal_play_yaml(),
            HashMap::new(),
            &provider,
            2 * 24 * 3_600_000,
            4 * 24 * 3_600_000,
        )
        .unwrap();
        assert!(outcome.report.sim_end_idx >= outcome.report.sim_start_idx);
        assert_eq!(outcome.metrics.total_trades as usize, outcome.report.trades.len());
    }

    #[test]
    fn repeated_runs_over_same_data_are_deterministic() {
        let provider = provider_with_data();
        let report = verify_play_determinism(
            minimal_play_yaml(),
            HashMap::new(),
            &provider,
            2 * 24 * 3_600_000,
            4 * 24 * 3_600_000,
            3,
        )
        .unwrap();
        assert!(report.all_identical, "mismatches: {:?}", report.mismatches);
    }
}
