//! Preflight & windowing (§4.L): resolves a compiled Play's declared
//! timeframes against a data provider, extends the query window backward by
//! the computed warmup, builds the `FeedStore`, and locates the first exec
//! index at which every declared feature/structure is ready to evaluate.

use std::collections::HashMap;

use crate::bar::Bar;
use crate::error::{DataError, EngineResult};
use crate::feed::{build_role_store, FeedStore, RoleStore, TimeframeRole};
use crate::play::CompiledPlay;
use crate::provider::{validate_provider_contract, HistoricalDataProvider};
use crate::time::{Timeframe, MINUTE_MS};

/// Extra bars fetched beyond the computed warmup, to absorb the rounding
/// inherent in scaling a higher-role warmup count down onto the exec tf.
const WARMUP_SAFETY_MARGIN_BARS: u32 = 10;

pub struct PreflightResult {
    pub feed: FeedStore,
    /// First exec index at which every declared feature has a non-NaN value
    /// and every exec-role structure detector's `min_warmup` has elapsed.
    pub sim_start_idx: usize,
}

fn fetch_role(
    provider: &dyn HistoricalDataProvider,
    symbol: &str,
    tf: Timeframe,
    start_ms: i64,
    end_ms: i64,
) -> EngineResult<Vec<Bar>> {
    let bars = provider.get_ohlcv(symbol, tf, start_ms, end_ms)?;
    validate_provider_contract(&bars, tf)?;
    Ok(bars)
}

/// First index where every feature column in `store` is non-NaN, i.e. the
/// role-local warmup has elapsed for every declared feature.
fn first_ready_idx(store: &RoleStore, structure_warmup: u32) -> usize {
    let feature_ready = (0..store.len())
        .find(|&i| store.feature_columns.values().all(|col| !col[i].is_nan()))
        .unwrap_or(store.len());
    feature_ready.max(structure_warmup as usize)
}

/// Runs preflight for one Play: fetches exec/med/high/1m bars over
/// `[requested_start_ms, end_ms]` extended backward by the Play's computed
/// warmup, validates provider contracts, builds the `FeedStore`, and
/// resolves `sim_start_idx`.
pub fn run_preflight(
    play: &CompiledPlay,
    provider: &dyn HistoricalDataProvider,
    requested_start_ms: i64,
    end_ms: i64,
) -> EngineResult<PreflightResult> {
    let exec_step_ms = i64::from(play.exec_tf.tf_minutes()) * MINUTE_MS;
    let warmup_ms = i64::from(play.warmup_bars_exec + WARMUP_SAFETY_MARGIN_BARS) * exec_step_ms;
    let fetch_start_ms = requested_start_ms - warmup_ms;

    if fetch_start_ms >= end_ms {
        return Err(DataError::CoverageError {
            symbol: play.symbol.clone(),
            tf: play.exec_tf.to_string(),
            start_ms: fetch_start_ms,
            end_ms,
        }
        .into());
    }

    let exec_bars = fetch_role(provider, &play.symbol, play.exec_tf, fetch_start_ms, end_ms)?;
    let exec_features = play.features.get(&TimeframeRole::Exec).cloned().unwrap_or_default();
    let exec_store = build_role_store(play.exec_tf, exec_bars, &exec_features);

    let med_store = match play.med_tf {
        Some(tf) => {
            let bars = fetch_role(provider, &play.symbol, tf, fetch_start_ms, end_ms)?;
            let features = play.features.get(&TimeframeRole::Med).cloned().unwrap_or_default();
            Some(build_role_store(tf, bars, &features))
        }
        None => None,
    };

    let high_store = match play.high_tf {
        Some(tf) => {
            let bars = fetch_role(provider, &play.symbol, tf, fetch_start_ms, end_ms)?;
            let features = play.features.get(&TimeframeRole::High).cloned().unwrap_or_default();
            Some(build_role_store(tf, bars, &features))
        }
        None => None,
    };

    let quote_bars = fetch_role(provider, &play.symbol, Timeframe::M1, fetch_start_ms, end_ms)?;
    let quote_1m = build_role_store(Timeframe::M1, quote_bars, &[]);

    let feed = FeedStore { exec: exec_store, med: med_store, high: high_store, quote_1m };

    let structure_warmup: u32 = play
        .structures
        .get(&TimeframeRole::Exec)
        .map(|nodes| nodes.iter().map(|n| n.min_warmup()).sum())
        .unwrap_or(0);
    let feature_and_structure_ready = first_ready_idx(&feed.exec, structure_warmup);

    let requested_start_idx = feed
        .exec
        .ts_open
        .iter()
        .position(|&ts| ts >= requested_start_ms)
        .unwrap_or(feed.exec.len());

    let sim_start_idx = feature_and_structure_ready.max(requested_start_idx);
    if sim_start_idx >= feed.exec.len() {
        return Err(DataError::CoverageError {
            symbol: play.symbol.clone(),
            tf: play.exec_tf.to_string(),
            start_ms: requested_start_ms,
            end_ms,
        }
        .into());
    }

    Ok(PreflightResult { feed, sim_start_idx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::play::load_play;
    use crate::provider::{generate_synthetic, SyntheticPattern};
    use crate::provider::StaticProvider;

    fn play_with_emas() -> CompiledPlay {
        let yaml = r#"
name: test
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
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
"#;
        load_play(yaml, HashMap::new()).unwrap()
    }

    #[test]
    fn resolves_sim_start_idx_after_warmup() {
        let play = play_with_emas();
        let bars_1m = generate_synthetic(SyntheticPattern::RangeTight, Timeframe::M1, 1, 20_000, 0);
        let bars_15m = generate_synthetic(SyntheticPattern::RangeTight, Timeframe::M15, 1, 2_000, 0);
        let bars_1h = generate_synthetic(SyntheticPattern::RangeTight, Timeframe::H1, 1, 500, 0);
        let provider = StaticProvider::new()
            .with_series("BTCUSDT", Timeframe::M1, bars_1m)
            .with_series("BTCUSDT", Timeframe::M15, bars_15m)
            .with_series("BTCUSDT", Timeframe::H1, bars_1h);

        let start_ms = 2 * 24 * 3_600_000i64;
        let end_ms = 4 * 24 * 3_600_000i64;
        let result = run_preflight(&play, &provider, start_ms, end_ms).unwrap();
        assert!(result.sim_start_idx < result.feed.exec.len());
        assert!(result.feed.exec.ts_open[result.sim_start_idx] >= start_ms);
    }

    #[test]
    fn rejects_when_no_data_covers_warmup_extended_window() {
        let play = play_with_emas();
        let bars_1m = generate_synthetic(SyntheticPattern::RangeTight, Timeframe::M1, 1, 100, 10_000_000_000);
        let provider = StaticProvider::new().with_series("BTCUSDT", Timeframe::M1, bars_1m);
        let err = run_preflight(&play, &provider, 0, 1_000_000);
        assert!(err.is_err());
    }
}
