//! Moving averages (10 types, §2 row B).

use std::collections::VecDeque;

use crate::bar::{Bar, InputSource};

use super::{Ewm, IndicatorOutput, RollingSum, StreamingIndicator};

#[derive(Debug, Clone)]
pub struct Sma {
    input: InputSource,
    inner: RollingSum,
    length: usize,
}

impl Sma {
    pub fn new(length: u32, input: InputSource) -> Self {
        Self { input, inner: RollingSum::new(length.max(1) as usize), length: length.max(1) as usize }
    }
}

impl StreamingIndicator for Sma {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        IndicatorOutput::single(self.inner.update(self.input.extract(bar)).unwrap_or(f64::NAN))
    }
    fn is_ready(&self) -> bool {
        self.inner.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
}

#[derive(Debug, Clone)]
pub struct Ema {
    input: InputSource,
    inner: Ewm,
    length: usize,
}

impl Ema {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, inner: Ewm::new(2.0 / (n as f64 + 1.0), n), length: n }
    }
}

impl StreamingIndicator for Ema {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        IndicatorOutput::single(self.inner.update(self.input.extract(bar)).unwrap_or(f64::NAN))
    }
    fn is_ready(&self) -> bool {
        self.inner.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Weighted Moving Average: linearly increasing weights, most recent heaviest.
#[derive(Debug, Clone)]
pub struct Wma {
    input: InputSource,
    buf: VecDeque<f64>,
    length: usize,
}

impl Wma {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, buf: VecDeque::with_capacity(n), length: n }
    }

    fn compute(&self) -> Option<f64> {
        if self.buf.len() < self.length {
            return None;
        }
        let denom = (self.length * (self.length + 1) / 2) as f64;
        let weighted: f64 = self
            .buf
            .iter()
            .enumerate()
            .map(|(i, v)| v * (i + 1) as f64)
            .sum();
        Some(weighted / denom)
    }
}

impl StreamingIndicator for Wma {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.buf.push_back(self.input.extract(bar));
        if self.buf.len() > self.length {
            self.buf.pop_front();
        }
        IndicatorOutput::single(self.compute().unwrap_or(f64::NAN))
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

/// Double EMA: `2*EMA(x) - EMA(EMA(x))`, reduces lag versus a plain EMA.
#[derive(Debug, Clone)]
pub struct Dema {
    input: InputSource,
    ema1: Ewm,
    ema2: Ewm,
    length: usize,
}

impl Dema {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        let alpha = 2.0 / (n as f64 + 1.0);
        Self { input, ema1: Ewm::new(alpha, n), ema2: Ewm::new(alpha, n), length: n }
    }
}

impl StreamingIndicator for Dema {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        let e1 = self.ema1.update(v);
        let e2 = e1.and_then(|e1v| self.ema2.update(e1v));
        match (e1, e2) {
            (Some(e1v), Some(e2v)) => IndicatorOutput::single(2.0 * e1v - e2v),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.ema2.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        2 * self.length
    }
    fn reset(&mut self) {
        self.ema1.reset();
        self.ema2.reset();
    }
}

/// Triple EMA: `3*EMA1 - 3*EMA2 + EMA3`.
#[derive(Debug, Clone)]
pub struct Tema {
    input: InputSource,
    ema1: Ewm,
    ema2: Ewm,
    ema3: Ewm,
    length: usize,
}

impl Tema {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        let alpha = 2.0 / (n as f64 + 1.0);
        Self { input, ema1: Ewm::new(alpha, n), ema2: Ewm::new(alpha, n), ema3: Ewm::new(alpha, n), length: n }
    }
}

impl StreamingIndicator for Tema {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        let e1 = self.ema1.update(v);
        let e2 = e1.and_then(|e1v| self.ema2.update(e1v));
        let e3 = e2.and_then(|e2v| self.ema3.update(e2v));
        match (e1, e2, e3) {
            (Some(e1v), Some(e2v), Some(e3v)) => IndicatorOutput::single(3.0 * e1v - 3.0 * e2v + e3v),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.ema3.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        3 * self.length
    }
    fn reset(&mut self) {
        self.ema1.reset();
        self.ema2.reset();
        self.ema3.reset();
    }
}

/// Hull Moving Average: `WMA(2*WMA(n/2) - WMA(n), sqrt(n))`.
#[derive(Debug, Clone)]
pub struct Hma {
    input: InputSource,
    wma_half: Wma,
    wma_full: Wma,
    wma_smooth: Wma,
    length: usize,
}

impl Hma {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(2) as usize;
        let half = (n / 2).max(1) as u32;
        let sqrt_n = (n as f64).sqrt().round().max(1.0) as u32;
        Self {
            input,
            wma_half: Wma::new(half, input),
            wma_full: Wma::new(n as u32, input),
            wma_smooth: Wma::new(sqrt_n, InputSource::Close),
            length: n,
        }
    }
}

impl StreamingIndicator for Hma {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let half_out = self.wma_half.push(bar).value();
        let full_out = self.wma_full.push(bar).value();
        if half_out.is_nan() || full_out.is_nan() {
            return IndicatorOutput::single(f64::NAN);
        }
        let raw = 2.0 * half_out - full_out;
        let synthetic = Bar { close: crate::domain::Price(raw), ..*bar };
        IndicatorOutput::single(self.wma_smooth.push(&synthetic).value())
    }
    fn is_ready(&self) -> bool {
        self.wma_smooth.is_ready()
    }
    fn warmup_bars(&self) -> usize {
        self.length + (self.length as f64).sqrt().round() as usize
    }
    fn reset(&mut self) {
        self.wma_half.reset();
        self.wma_full.reset();
        self.wma_smooth.reset();
    }
}

/// Kaufman's Adaptive Moving Average: efficiency-ratio scaled smoothing.
#[derive(Debug, Clone)]
pub struct Kama {
    input: InputSource,
    buf: VecDeque<f64>,
    length: usize,
    prev_kama: Option<f64>,
    fast_alpha: f64,
    slow_alpha: f64,
}

impl Kama {
    pub fn new(length: u32, input: InputSource) -> Self {
        Self {
            input,
            buf: VecDeque::with_capacity(length.max(1) as usize + 1),
            length: length.max(1) as usize,
            prev_kama: None,
            fast_alpha: 2.0 / 3.0,
            slow_alpha: 2.0 / 31.0,
        }
    }
}

impl StreamingIndicator for Kama {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        self.buf.push_back(v);
        if self.buf.len() > self.length + 1 {
            self.buf.pop_front();
        }
        if self.buf.len() <= self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let change = (self.buf[self.buf.len() - 1] - self.buf[0]).abs();
        let volatility: f64 = self.buf.iter().collect::<Vec<_>>().windows(2).map(|w| (w[1] - w[0]).abs()).sum();
        let er = if volatility > 0.0 { change / volatility } else { 0.0 };
        let sc = (er * (self.fast_alpha - self.slow_alpha) + self.slow_alpha).powi(2);
        let prev = self.prev_kama.unwrap_or(v);
        let next = prev + sc * (v - prev);
        self.prev_kama = Some(next);
        IndicatorOutput::single(next)
    }
    fn is_ready(&self) -> bool {
        self.buf.len() > self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
        self.prev_kama = None;
    }
}

/// Volume-Weighted Moving Average over a rolling window.
#[derive(Debug, Clone)]
pub struct Vwma {
    input: InputSource,
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    length: usize,
}

impl Vwma {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, prices: VecDeque::with_capacity(n), volumes: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for Vwma {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.prices.push_back(self.input.extract(bar));
        self.volumes.push_back(bar.volume.0);
        if self.prices.len() > self.length {
            self.prices.pop_front();
            self.volumes.pop_front();
        }
        if self.prices.len() < self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let vol_sum: f64 = self.volumes.iter().sum();
        if vol_sum <= 0.0 {
            return IndicatorOutput::single(f64::NAN);
        }
        let pv_sum: f64 = self.prices.iter().zip(self.volumes.iter()).map(|(p, v)| p * v).sum();
        IndicatorOutput::single(pv_sum / vol_sum)
    }
    fn is_ready(&self) -> bool {
        self.prices.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.prices.clear();
        self.volumes.clear();
    }
}

/// Zero-Lag EMA: EMA of a de-lagged series `2*x_t - x_{t-lag}`.
#[derive(Debug, Clone)]
pub struct Zlema {
    input: InputSource,
    buf: VecDeque<f64>,
    lag: usize,
    ewm: Ewm,
    length: usize,
}

impl Zlema {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        let lag = ((n - 1) / 2).max(1);
        Self { input, buf: VecDeque::with_capacity(lag + 1), lag, ewm: Ewm::new(2.0 / (n as f64 + 1.0), n), length: n }
    }
}

impl StreamingIndicator for Zlema {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        self.buf.push_back(v);
        if self.buf.len() > self.lag + 1 {
            self.buf.pop_front();
        }
        let delagged = if self.buf.len() > self.lag {
            2.0 * v - self.buf[0]
        } else {
            v
        };
        IndicatorOutput::single(self.ewm.update(delagged).unwrap_or(f64::NAN))
    }
    fn is_ready(&self) -> bool {
        self.ewm.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
        self.ewm.reset();
    }
}

/// Triangular Moving Average: SMA of an SMA (double-smoothed, more lag).
#[derive(Debug, Clone)]
pub struct Trima {
    input: InputSource,
    inner: RollingSum,
    outer: RollingSum,
    length: usize,
}

impl Trima {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        let half = n.div_ceil(2).max(1);
        Self { input, inner: RollingSum::new(half), outer: RollingSum::new(half), length: n }
    }
}

impl StreamingIndicator for Trima {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        match self.inner.update(v) {
            Some(sma1) => IndicatorOutput::single(self.outer.update(sma1).unwrap_or(f64::NAN)),
            None => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.outer.len() >= self.outer.len().max(1) && self.outer.sum().is_some()
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.inner.reset();
        self.outer.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(close: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(close), high: Price(close), low: Price(close), close: Price(close), volume: Quantity(1.0) }
    }

    #[test]
    fn sma_matches_arithmetic_mean() {
        let mut sma = Sma::new(3, InputSource::Close);
        for x in [1.0, 2.0, 3.0] {
            sma.push(&bar(x));
        }
        assert!((sma.push(&bar(4.0)).value() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn dema_ready_after_double_warmup() {
        let mut dema = Dema::new(2, InputSource::Close);
        for i in 0..10 {
            dema.push(&bar(100.0 + i as f64));
        }
        assert!(dema.is_ready());
    }
}
