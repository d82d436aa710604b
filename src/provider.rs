//! Historical data provider contract (§6.2) and the deterministic synthetic
//! generator (§6.4). Modeled as a trait object so a test harness can supply
//! synthetic data or Parquet-backed data interchangeably — the engine core
//! never fabricates bars itself, it only consumes what a provider yields.

use crate::bar::Bar;
use crate::domain::{Price, Volume};
use crate::error::{DataError, EngineResult};
use crate::time::{Timeframe, MINUTE_MS};

/// `get_ohlcv(symbol, tf, start_ms, end_ms) -> bars` (§6.2). Implementations
/// must return bars in monotonic `ts_open` order with no duplicates and
/// never a bar whose `ts_close` exceeds the query window's `end_ms` (no
/// forward-looking data). The core surfaces violations as `DataError`
/// rather than silently repairing them — correctness here is load-bearing
/// for the no-lookahead property (§8.1).
pub trait HistoricalDataProvider: Send + Sync {
    fn get_ohlcv(&self, symbol: &str, tf: Timeframe, start_ms: i64, end_ms: i64) -> EngineResult<Vec<Bar>>;
}

/// Validates the monotonic/no-duplicate/aligned contract every provider
/// implementation must satisfy; called once per query by `Preflight`.
pub fn validate_provider_contract(bars: &[Bar], tf: Timeframe) -> EngineResult<()> {
    let step = i64::from(tf.tf_minutes()) * MINUTE_MS;
    let mut prev_open: Option<i64> = None;
    for bar in bars {
        bar.validate()?;
        if !tf.is_calendar() && bar.ts_open % step != 0 {
            return Err(DataError::MisalignedBar { ts_open: bar.ts_open, tf: tf.to_string() }.into());
        }
        if let Some(p) = prev_open {
            if bar.ts_open == p {
                return Err(DataError::DuplicateBar { ts_open: bar.ts_open }.into());
            }
            if bar.ts_open < p {
                return Err(DataError::NonMonotonicBar { ts_open: bar.ts_open }.into());
            }
        }
        prev_open = Some(bar.ts_open);
    }
    Ok(())
}

/// A provider backed by an in-memory, pre-sorted bar set per `(symbol, tf)`
/// — the shape a Parquet-backed blob-store reader would present once
/// loaded, and what `tests/` fixtures construct directly.
#[derive(Default)]
pub struct StaticProvider {
    series: Vec<((String, Timeframe), Vec<Bar>)>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, symbol: impl Into<String>, tf: Timeframe, bars: Vec<Bar>) -> Self {
        self.series.push(((symbol.into(), tf), bars));
        self
    }
}

impl HistoricalDataProvider for StaticProvider {
    fn get_ohlcv(&self, symbol: &str, tf: Timeframe, start_ms: i64, end_ms: i64) -> EngineResult<Vec<Bar>> {
        let Some((_, bars)) = self.series.iter().find(|((s, t), _)| s == symbol && *t == tf) else {
            return Err(DataError::CoverageError { symbol: symbol.to_string(), tf: tf.to_string(), start_ms, end_ms }.into());
        };
        let slice: Vec<Bar> = bars.iter().filter(|b| b.ts_open >= start_ms && b.ts_close <= end_ms).copied().collect();
        if slice.is_empty() {
            return Err(DataError::CoverageError { symbol: symbol.to_string(), tf: tf.to_string(), start_ms, end_ms }.into());
        }
        Ok(slice)
    }
}

/// Declared synthetic patterns (§6.4), matching a Play's `synthetic:` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticPattern {
    TrendUpClean,
    TrendDownClean,
    RangeTight,
    BreakoutFalse,
}

/// Deterministic LCG — no `rand` crate entropy source, so the same
/// `(pattern, seed, n)` always yields byte-identical bars (§5: "no
/// randomness except a seed supplied by the Play's `synthetic.seed`").
struct DeterministicRng(u64);

impl DeterministicRng {
    fn next_unit(&mut self) -> f64 {
        // Numerical Recipes LCG constants.
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) as f64) / (u32::MAX as f64)
    }
}

/// Generates `n` bars of `tf` for `pattern`, seeded deterministically
/// (§6.4 external collaborator, consumed identically to historical bars).
pub fn generate_synthetic(pattern: SyntheticPattern, tf: Timeframe, seed: u64, n: usize, start_ts: i64) -> Vec<Bar> {
    let mut rng = DeterministicRng(seed ^ 0x9E3779B97F4A7C15);
    let step = i64::from(tf.tf_minutes()) * MINUTE_MS;
    let mut bars = Vec::with_capacity(n);
    let mut price = 50_000.0f64;

    for i in 0..n {
        let noise = (rng.next_unit() - 0.5) * 2.0;
        let drift = match pattern {
            SyntheticPattern::TrendUpClean => 25.0 + noise * 10.0,
            SyntheticPattern::TrendDownClean => -25.0 - noise * 10.0,
            SyntheticPattern::RangeTight => noise * 15.0,
            SyntheticPattern::BreakoutFalse => {
                if i > 0 && i % 50 == 0 {
                    noise * 300.0
                } else {
                    noise * 12.0
                }
            }
        };
        let open = price;
        let close = (open + drift).max(1.0);
        let wick = (open - close).abs().max(5.0) * (0.5 + rng.next_unit());
        let high = open.max(close) + wick * 0.5;
        let low = (open.min(close) - wick * 0.5).max(0.5);
        let volume = 10.0 + rng.next_unit() * 50.0;
        let ts_open = start_ts + (i as i64) * step;

        bars.push(Bar {
            ts_open,
            ts_close: ts_open + step,
            open: Price(open),
            high: Price(high),
            low: Price(low),
            close: Price(close),
            volume: Volume(volume),
        });
        price = close;
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_generation_is_deterministic() {
        let a = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M15, 7, 50, 0);
        let b = generate_synthetic(SyntheticPattern::TrendUpClean, Timeframe::M15, 7, 50, 0);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.close.0, y.close.0);
        }
    }

    #[test]
    fn synthetic_bars_satisfy_ohlcv_invariants() {
        let bars = generate_synthetic(SyntheticPattern::RangeTight, Timeframe::M1, 1, 200, 0);
        for b in &bars {
            b.validate().unwrap();
        }
        validate_provider_contract(&bars, Timeframe::M1).unwrap();
    }

    #[test]
    fn static_provider_reports_coverage_gap() {
        let provider = StaticProvider::new().with_series("BTCUSDT", Timeframe::M1, vec![]);
        let err = provider.get_ohlcv("BTCUSDT", Timeframe::M1, 0, 1000);
        assert!(err.is_err());
    }
}
