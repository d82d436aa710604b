//! Miscellaneous indicators (6 types, §2 row B).

use std::collections::VecDeque;

use crate::bar::{Bar, InputSource};
use crate::domain::Price;

use super::{IndicatorOutput, RollingSum, StreamingIndicator};

/// Classic floor-trader pivot points, recomputed each bar from the
/// *previous* bar's high/low/close (one-bar lag is intentional: intrabar
/// pivots would leak the current bar's own range).
#[derive(Debug, Clone, Default)]
pub struct PivotPoints {
    prev: Option<(f64, f64, f64)>,
}

impl PivotPoints {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for PivotPoints {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let prev = self.prev.replace((bar.high.0, bar.low.0, bar.close.0));
        match prev {
            Some((h, l, c)) => {
                let pivot = (h + l + c) / 3.0;
                IndicatorOutput::named(&[
                    ("pivot", pivot),
                    ("r1", 2.0 * pivot - l),
                    ("s1", 2.0 * pivot - h),
                    ("r2", pivot + (h - l)),
                    ("s2", pivot - (h - l)),
                ])
            }
            None => IndicatorOutput::named(&[
                ("pivot", f64::NAN),
                ("r1", f64::NAN),
                ("s1", f64::NAN),
                ("r2", f64::NAN),
                ("s2", f64::NAN),
            ]),
        }
    }
    fn is_ready(&self) -> bool {
        self.prev.is_some()
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.prev = None;
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["pivot", "r1", "s1", "r2", "s2"]
    }
}

/// Rolling linear regression: least-squares fit over the last `length` bars,
/// evaluated at the most recent bar (i.e. the "line value" output used by
/// TradingView's `linreg`).
#[derive(Debug, Clone)]
pub struct LinearRegression {
    input: InputSource,
    buf: VecDeque<f64>,
    length: usize,
}

impl LinearRegression {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(2) as usize;
        Self { input, buf: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for LinearRegression {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.buf.push_back(self.input.extract(bar));
        if self.buf.len() > self.length {
            self.buf.pop_front();
        }
        if self.buf.len() < self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let n = self.length as f64;
        let sum_x = (0..self.length).sum::<usize>() as f64;
        let sum_y: f64 = self.buf.iter().sum();
        let sum_xy: f64 = self.buf.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
        let sum_xx: f64 = (0..self.length).map(|i| (i * i) as f64).sum();
        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return IndicatorOutput::single(sum_y / n);
        }
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;
        IndicatorOutput::single(intercept + slope * (n - 1.0))
    }
    fn is_ready(&self) -> bool {
        self.buf.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Rolling z-score: `(x - mean) / stddev` over a window.
#[derive(Debug, Clone)]
pub struct ZScore {
    input: InputSource,
    window: RollingSum,
    length: usize,
}

impl ZScore {
    pub fn new(length: u32, input: InputSource) -> Self {
        Self { input, window: RollingSum::new(length.max(1) as usize), length: length.max(1) as usize }
    }
}

impl StreamingIndicator for ZScore {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        match self.window.update(v) {
            Some(mean) => {
                let sd = self.window.std_dev().unwrap_or(0.0);
                IndicatorOutput::single(if sd > 0.0 { (v - mean) / sd } else { 0.0 })
            }
            None => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.window.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.window.reset();
    }
}

/// True Range (single-bar, no smoothing pass — `Atr` wraps this + Wilder
/// smoothing for the length-parameterized variant).
#[derive(Debug, Clone, Default)]
pub struct TrueRange {
    prev_close: Option<f64>,
}

impl TrueRange {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for TrueRange {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let tr = match self.prev_close {
            Some(pc) => (bar.high.0 - bar.low.0).max((bar.high.0 - pc).abs()).max((bar.low.0 - pc).abs()),
            None => bar.high.0 - bar.low.0,
        };
        self.prev_close = Some(bar.close.0);
        IndicatorOutput::single(tr)
    }
    fn is_ready(&self) -> bool {
        true
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.prev_close = None;
    }
}

/// Smoothed Rate of Change: ROC passed through an additional SMA smoothing
/// pass (distinct registry entry from plain `Roc`, §2 row B "misc").
#[derive(Debug, Clone)]
pub struct RateOfChangeSmoothed {
    input: InputSource,
    buf: VecDeque<f64>,
    smooth: RollingSum,
    length: usize,
}

impl RateOfChangeSmoothed {
    pub fn new(length: u32, signal: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, buf: VecDeque::with_capacity(n + 1), smooth: RollingSum::new(signal.max(1) as usize), length: n }
    }
}

impl StreamingIndicator for RateOfChangeSmoothed {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        self.buf.push_back(v);
        if self.buf.len() > self.length + 1 {
            self.buf.pop_front();
        }
        if self.buf.len() <= self.length {
            self.smooth.update(0.0);
            return IndicatorOutput::single(f64::NAN);
        }
        let past = self.buf[0];
        let roc = if past != 0.0 { (v - past) / past * 100.0 } else { 0.0 };
        IndicatorOutput::single(self.smooth.update(roc).unwrap_or(f64::NAN))
    }
    fn is_ready(&self) -> bool {
        self.buf.len() > self.length && self.smooth.sum().is_some()
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
        self.smooth.reset();
    }
}

/// Heikin-Ashi close: `(open + high + low + close) / 4` of the synthetic
/// Heikin-Ashi candle, recursively derived from the previous HA candle.
#[derive(Debug, Clone, Default)]
pub struct HeikinAshiClose {
    prev_ha_open: Option<f64>,
    prev_ha_close: Option<f64>,
}

impl HeikinAshiClose {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for HeikinAshiClose {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let ha_close = bar.ohlc4();
        let ha_open = match (self.prev_ha_open, self.prev_ha_close) {
            (Some(po), Some(pc)) => (po + pc) / 2.0,
            _ => (bar.open.0 + bar.close.0) / 2.0,
        };
        self.prev_ha_open = Some(ha_open);
        self.prev_ha_close = Some(ha_close);
        let _ = Price(ha_open);
        IndicatorOutput::single(ha_close)
    }
    fn is_ready(&self) -> bool {
        self.prev_ha_close.is_some()
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.prev_ha_open = None;
        self.prev_ha_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Quantity;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(o), high: Price(h), low: Price(l), close: Price(c), volume: Quantity(10.0) }
    }

    #[test]
    fn pivot_points_lag_one_bar() {
        let mut pp = PivotPoints::new();
        assert!(pp.push(&bar(100.0, 110.0, 90.0, 105.0)).value().is_nan());
        let out = pp.push(&bar(106.0, 112.0, 98.0, 108.0));
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((out.get("pivot").unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn linear_regression_on_straight_line_matches_last_point() {
        let mut lr = LinearRegression::new(3, InputSource::Close);
        let mut last = f64::NAN;
        for c in [1.0, 2.0, 3.0, 4.0, 5.0] {
            last = lr.push(&bar(c, c, c, c)).value();
        }
        assert!((last - 5.0).abs() < 1e-6);
    }

    #[test]
    fn zscore_of_constant_series_is_zero() {
        let mut z = ZScore::new(3, InputSource::Close);
        let mut last = f64::NAN;
        for _ in 0..5 {
            last = z.push(&bar(10.0, 10.0, 10.0, 10.0)).value();
        }
        assert_eq!(last, 0.0);
    }
}
