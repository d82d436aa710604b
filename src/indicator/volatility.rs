//! Volatility indicators (6 types, §2 row B).

use std::collections::VecDeque;

use crate::bar::{Bar, InputSource};

use super::{IndicatorOutput, RollingSum, StreamingIndicator};

/// Average True Range: Wilder-smoothed mean of the true range.
#[derive(Debug, Clone)]
pub struct Atr {
    prev_close: Option<f64>,
    tr_sum: RollingSum,
    length: usize,
}

impl Atr {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { prev_close: None, tr_sum: RollingSum::new(n), length: n }
    }

    fn true_range(&self, bar: &Bar) -> f64 {
        match self.prev_close {
            Some(pc) => (bar.high.0 - bar.low.0).max((bar.high.0 - pc).abs()).max((bar.low.0 - pc).abs()),
            None => bar.high.0 - bar.low.0,
        }
    }
}

impl StreamingIndicator for Atr {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let tr = self.true_range(bar);
        self.prev_close = Some(bar.close.0);
        IndicatorOutput::single(self.tr_sum.update(tr).unwrap_or(f64::NAN))
    }
    fn is_ready(&self) -> bool {
        self.tr_sum.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.prev_close = None;
        self.tr_sum.reset();
    }
}

/// Bollinger Bands: SMA middle band, `multiplier * stddev` upper/lower.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    input: InputSource,
    window: RollingSum,
    multiplier: f64,
    length: usize,
}

impl BollingerBands {
    pub fn new(length: u32, multiplier: f64, input: InputSource) -> Self {
        Self { input, window: RollingSum::new(length.max(1) as usize), multiplier, length: length.max(1) as usize }
    }
}

impl StreamingIndicator for BollingerBands {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        match self.window.update(v) {
            Some(mid) => {
                let sd = self.window.std_dev().unwrap_or(0.0);
                IndicatorOutput::named(&[
                    ("middle", mid),
                    ("upper", mid + self.multiplier * sd),
                    ("lower", mid - self.multiplier * sd),
                ])
            }
            None => IndicatorOutput::named(&[("middle", f64::NAN), ("upper", f64::NAN), ("lower", f64::NAN)]),
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
    fn output_keys(&self) -> &'static [&'static str] {
        &["middle", "upper", "lower"]
    }
}

/// Keltner Channel: EMA-of-typical-price middle, ATR-scaled upper/lower.
#[derive(Debug, Clone)]
pub struct KeltnerChannel {
    mid: super::moving_average::Ema,
    atr: Atr,
    multiplier: f64,
    length: usize,
}

impl KeltnerChannel {
    pub fn new(length: u32, multiplier: f64) -> Self {
        Self {
            mid: super::moving_average::Ema::new(length, InputSource::Hlc3),
            atr: Atr::new(length),
            multiplier,
            length: length.max(1) as usize,
        }
    }
}

impl StreamingIndicator for KeltnerChannel {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let mid = self.mid.push(bar).value();
        let atr = self.atr.push(bar).value();
        if mid.is_nan() || atr.is_nan() {
            return IndicatorOutput::named(&[("middle", f64::NAN), ("upper", f64::NAN), ("lower", f64::NAN)]);
        }
        IndicatorOutput::named(&[("middle", mid), ("upper", mid + self.multiplier * atr), ("lower", mid - self.multiplier * atr)])
    }
    fn is_ready(&self) -> bool {
        self.mid.is_ready() && self.atr.is_ready()
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.mid.reset();
        self.atr.reset();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["middle", "upper", "lower"]
    }
}

/// Donchian Channel: rolling highest-high / lowest-low, midline is their mean.
#[derive(Debug, Clone)]
pub struct DonchianChannel {
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    length: usize,
}

impl DonchianChannel {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { highs: VecDeque::with_capacity(n), lows: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for DonchianChannel {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.highs.push_back(bar.high.0);
        self.lows.push_back(bar.low.0);
        if self.highs.len() > self.length {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.length {
            return IndicatorOutput::named(&[("upper", f64::NAN), ("lower", f64::NAN), ("middle", f64::NAN)]);
        }
        let hi = self.highs.iter().cloned().fold(f64::MIN, f64::max);
        let lo = self.lows.iter().cloned().fold(f64::MAX, f64::min);
        IndicatorOutput::named(&[("upper", hi), ("lower", lo), ("middle", (hi + lo) / 2.0)])
    }
    fn is_ready(&self) -> bool {
        self.highs.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["upper", "lower", "middle"]
    }
}

/// Rolling standard deviation of the input source.
#[derive(Debug, Clone)]
pub struct StdDev {
    input: InputSource,
    window: RollingSum,
    length: usize,
}

impl StdDev {
    pub fn new(length: u32, input: InputSource) -> Self {
        Self { input, window: RollingSum::new(length.max(1) as usize), length: length.max(1) as usize }
    }
}

impl StreamingIndicator for StdDev {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        match self.window.update(v) {
            Some(_) => IndicatorOutput::single(self.window.std_dev().unwrap_or(f64::NAN)),
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

/// Historical (annualized) volatility: stddev of log returns, scaled by
/// `sqrt(365)`. Scaling is a constant irrespective of bar timeframe, matching
/// the registry's "one formula per type" contract (§4.B); callers needing a
/// timeframe-aware annualization factor rescale the output downstream.
#[derive(Debug, Clone)]
pub struct HistoricalVolatility {
    prev_close: Option<f64>,
    window: RollingSum,
    length: usize,
}

impl HistoricalVolatility {
    pub fn new(length: u32) -> Self {
        Self { prev_close: None, window: RollingSum::new(length.max(1) as usize), length: length.max(1) as usize }
    }
}

impl StreamingIndicator for HistoricalVolatility {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let close = bar.close.0;
        let ret = match self.prev_close.replace(close) {
            Some(pc) if pc > 0.0 => (close / pc).ln(),
            _ => {
                self.window.update(0.0);
                return IndicatorOutput::single(f64::NAN);
            }
        };
        match self.window.update(ret) {
            Some(_) => IndicatorOutput::single(self.window.std_dev().unwrap_or(f64::NAN) * (365.0_f64).sqrt()),
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
        self.prev_close = None;
        self.window.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(h: f64, l: f64, c: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(c), high: Price(h), low: Price(l), close: Price(c), volume: Quantity(10.0) }
    }

    #[test]
    fn atr_of_flat_range_equals_range() {
        let mut atr = Atr::new(2);
        atr.push(&bar(110.0, 100.0, 105.0));
        let v = atr.push(&bar(110.0, 100.0, 105.0)).value();
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn bollinger_upper_above_middle_above_lower() {
        let mut bb = BollingerBands::new(3, 2.0, InputSource::Close);
        let mut out = IndicatorOutput::default();
        for c in [100.0, 102.0, 98.0, 105.0] {
            out = bb.push(&bar(c + 1.0, c - 1.0, c));
        }
        assert!(out.get("upper").unwrap() >= out.get("middle").unwrap());
        assert!(out.get("middle").unwrap() >= out.get("lower").unwrap());
    }

    #[test]
    fn donchian_ready_after_length_bars() {
        let mut dc = DonchianChannel::new(3);
        let mut out = IndicatorOutput::default();
        for i in 0..5 {
            out = dc.push(&bar(100.0 + i as f64, 90.0 - i as f64, 95.0));
        }
        assert!(out.get("upper").unwrap() > out.get("lower").unwrap());
    }
}
