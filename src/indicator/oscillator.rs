//! Oscillators (10 types, §2 row B).

use std::collections::VecDeque;

use crate::bar::{Bar, InputSource};

use super::{Ewm, IndicatorOutput, RollingExtremum, RollingSum, StreamingIndicator};

/// Wilder's-smoothed Relative Strength Index.
#[derive(Debug, Clone)]
pub struct Rsi {
    input: InputSource,
    prev: Option<f64>,
    avg_gain: Ewm,
    avg_loss: Ewm,
    length: usize,
}

impl Rsi {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        let alpha = 1.0 / n as f64;
        Self { input, prev: None, avg_gain: Ewm::new(alpha, n), avg_loss: Ewm::new(alpha, n), length: n }
    }
}

impl StreamingIndicator for Rsi {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        let prev = match self.prev {
            Some(p) => p,
            None => {
                self.prev = Some(v);
                return IndicatorOutput::single(f64::NAN);
            }
        };
        self.prev = Some(v);
        let delta = v - prev;
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, delta.abs()) };
        match (self.avg_gain.update(gain), self.avg_loss.update(loss)) {
            (Some(g), Some(l)) if l == 0.0 => IndicatorOutput::single(if g == 0.0 { 50.0 } else { 100.0 }),
            (Some(g), Some(l)) => IndicatorOutput::single(100.0 - 100.0 / (1.0 + g / l)),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.avg_gain.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.prev = None;
        self.avg_gain.reset();
        self.avg_loss.reset();
    }
}

/// Stochastic oscillator: `%K` on close-vs-range, `%D` as an SMA-smoothed `%K`.
#[derive(Debug, Clone)]
pub struct Stochastic {
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    closes: VecDeque<f64>,
    length: usize,
    d_smooth: RollingSum,
}

impl Stochastic {
    pub fn new(length: u32, signal: u32) -> Self {
        let n = length.max(1) as usize;
        Self {
            highs: VecDeque::with_capacity(n),
            lows: VecDeque::with_capacity(n),
            closes: VecDeque::with_capacity(n),
            length: n,
            d_smooth: RollingSum::new(signal.max(1) as usize),
        }
    }
}

impl StreamingIndicator for Stochastic {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.highs.push_back(bar.high.0);
        self.lows.push_back(bar.low.0);
        self.closes.push_back(bar.close.0);
        if self.highs.len() > self.length {
            self.highs.pop_front();
            self.lows.pop_front();
            self.closes.pop_front();
        }
        if self.highs.len() < self.length {
            return IndicatorOutput::named(&[("k", f64::NAN), ("d", f64::NAN)]);
        }
        let hh = self.highs.iter().cloned().fold(f64::MIN, f64::max);
        let ll = self.lows.iter().cloned().fold(f64::MAX, f64::min);
        let close = *self.closes.back().unwrap();
        let k = if hh > ll { (close - ll) / (hh - ll) * 100.0 } else { 50.0 };
        let d = self.d_smooth.update(k);
        IndicatorOutput::named(&[("k", k), ("d", d.unwrap_or(f64::NAN))])
    }
    fn is_ready(&self) -> bool {
        self.d_smooth.sum().is_some()
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
        self.closes.clear();
        self.d_smooth.reset();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["k", "d"]
    }
}

/// Stochastic RSI: Stochastic formula applied to RSI values instead of price.
#[derive(Debug, Clone)]
pub struct StochRsi {
    rsi: Rsi,
    window: RollingExtremum,
    rsi_buf: VecDeque<f64>,
    length: usize,
}

impl StochRsi {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { rsi: Rsi::new(length, input), window: RollingExtremum::new(n), rsi_buf: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for StochRsi {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let rsi_val = self.rsi.push(bar).value();
        if rsi_val.is_nan() {
            self.window.update(f64::NAN);
            return IndicatorOutput::single(f64::NAN);
        }
        self.rsi_buf.push_back(rsi_val);
        if self.rsi_buf.len() > self.length {
            self.rsi_buf.pop_front();
        }
        let (hi, lo) = self.window.update(rsi_val);
        match (hi, lo) {
            (Some(hi), Some(lo)) if hi > lo => {
                IndicatorOutput::single((rsi_val - lo) / (hi - lo) * 100.0)
            }
            (Some(_), Some(_)) => IndicatorOutput::single(50.0),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.rsi.is_ready() && self.rsi_buf.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        2 * self.length
    }
    fn reset(&mut self) {
        self.rsi.reset();
        self.window.reset();
        self.rsi_buf.clear();
    }
}

/// Commodity Channel Index: `(typical - sma(typical)) / (0.015 * mean_deviation)`.
#[derive(Debug, Clone)]
pub struct Cci {
    buf: VecDeque<f64>,
    length: usize,
}

impl Cci {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { buf: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for Cci {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let tp = bar.hlc3();
        self.buf.push_back(tp);
        if self.buf.len() > self.length {
            self.buf.pop_front();
        }
        if self.buf.len() < self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let mean = self.buf.iter().sum::<f64>() / self.length as f64;
        let mean_dev = self.buf.iter().map(|v| (v - mean).abs()).sum::<f64>() / self.length as f64;
        if mean_dev == 0.0 {
            return IndicatorOutput::single(0.0);
        }
        IndicatorOutput::single((tp - mean) / (0.015 * mean_dev))
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

/// Williams %R: inverted stochastic, range `[-100, 0]`.
#[derive(Debug, Clone)]
pub struct WilliamsR {
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    length: usize,
}

impl WilliamsR {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { highs: VecDeque::with_capacity(n), lows: VecDeque::with_capacity(n), length: n }
    }
}

impl StreamingIndicator for WilliamsR {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.highs.push_back(bar.high.0);
        self.lows.push_back(bar.low.0);
        if self.highs.len() > self.length {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let hh = self.highs.iter().cloned().fold(f64::MIN, f64::max);
        let ll = self.lows.iter().cloned().fold(f64::MAX, f64::min);
        if hh == ll {
            return IndicatorOutput::single(-50.0);
        }
        IndicatorOutput::single((hh - bar.close.0) / (hh - ll) * -100.0)
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
}

/// Money Flow Index: volume-weighted RSI analogue over typical price.
#[derive(Debug, Clone)]
pub struct Mfi {
    prev_tp: Option<f64>,
    pos_flow: RollingSum,
    neg_flow: RollingSum,
    length: usize,
}

impl Mfi {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { prev_tp: None, pos_flow: RollingSum::new(n), neg_flow: RollingSum::new(n), length: n }
    }
}

impl StreamingIndicator for Mfi {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let tp = bar.hlc3();
        let raw_flow = tp * bar.volume.0;
        let prev = self.prev_tp.replace(tp);
        let (pos, neg) = match prev {
            Some(p) if tp > p => (raw_flow, 0.0),
            Some(p) if tp < p => (0.0, raw_flow),
            _ => (0.0, 0.0),
        };
        let pf = self.pos_flow.update(pos);
        let nf = self.neg_flow.update(neg);
        match (pf, nf) {
            (Some(pf), Some(nf)) if nf == 0.0 => IndicatorOutput::single(if pf == 0.0 { 50.0 } else { 100.0 }),
            (Some(pf), Some(nf)) => IndicatorOutput::single(100.0 - 100.0 / (1.0 + pf / nf)),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.pos_flow.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length + 1
    }
    fn reset(&mut self) {
        self.prev_tp = None;
        self.pos_flow.reset();
        self.neg_flow.reset();
    }
}

/// Rate of Change: `(x_t - x_{t-n}) / x_{t-n} * 100`.
#[derive(Debug, Clone)]
pub struct Roc {
    input: InputSource,
    buf: VecDeque<f64>,
    length: usize,
}

impl Roc {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, buf: VecDeque::with_capacity(n + 1), length: n }
    }
}

impl StreamingIndicator for Roc {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        self.buf.push_back(v);
        if self.buf.len() > self.length + 1 {
            self.buf.pop_front();
        }
        if self.buf.len() <= self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        let past = self.buf[0];
        IndicatorOutput::single(if past != 0.0 { (v - past) / past * 100.0 } else { 0.0 })
    }
    fn is_ready(&self) -> bool {
        self.buf.len() > self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Momentum: raw `x_t - x_{t-n}`.
#[derive(Debug, Clone)]
pub struct Momentum {
    input: InputSource,
    buf: VecDeque<f64>,
    length: usize,
}

impl Momentum {
    pub fn new(length: u32, input: InputSource) -> Self {
        let n = length.max(1) as usize;
        Self { input, buf: VecDeque::with_capacity(n + 1), length: n }
    }
}

impl StreamingIndicator for Momentum {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        self.buf.push_back(v);
        if self.buf.len() > self.length + 1 {
            self.buf.pop_front();
        }
        if self.buf.len() <= self.length {
            return IndicatorOutput::single(f64::NAN);
        }
        IndicatorOutput::single(v - self.buf[0])
    }
    fn is_ready(&self) -> bool {
        self.buf.len() > self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.buf.clear();
    }
}

/// True Strength Index: double-smoothed momentum ratio.
#[derive(Debug, Clone)]
pub struct Tsi {
    input: InputSource,
    prev: Option<f64>,
    pc_fast: Ewm,
    pc_slow: Ewm,
    apc_fast: Ewm,
    apc_slow: Ewm,
    warmup: usize,
    ready: bool,
}

impl Tsi {
    pub fn new(fast: u32, slow: u32, input: InputSource) -> Self {
        let f = fast.max(1) as usize;
        let s = slow.max(1) as usize;
        Self {
            input,
            prev: None,
            pc_fast: Ewm::new(2.0 / (f as f64 + 1.0), f),
            pc_slow: Ewm::new(2.0 / (s as f64 + 1.0), s),
            apc_fast: Ewm::new(2.0 / (f as f64 + 1.0), f),
            apc_slow: Ewm::new(2.0 / (s as f64 + 1.0), s),
            warmup: f + s,
            ready: false,
        }
    }
}

impl StreamingIndicator for Tsi {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        let prev = match self.prev.replace(v) {
            Some(p) => p,
            None => return IndicatorOutput::single(f64::NAN),
        };
        let pc = v - prev;
        let slow1 = self.pc_slow.update(pc);
        let slow2 = slow1.and_then(|s| self.pc_fast.update(s));
        let aslow1 = self.apc_slow.update(pc.abs());
        let aslow2 = aslow1.and_then(|s| self.apc_fast.update(s));
        match (slow2, aslow2) {
            (Some(num), Some(den)) if den != 0.0 => {
                self.ready = true;
                IndicatorOutput::single(100.0 * num / den)
            }
            (Some(_), Some(_)) => {
                self.ready = true;
                IndicatorOutput::single(0.0)
            }
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn warmup_bars(&self) -> usize {
        self.warmup
    }
    fn reset(&mut self) {
        self.prev = None;
        self.pc_fast.reset();
        self.pc_slow.reset();
        self.apc_fast.reset();
        self.apc_slow.reset();
        self.ready = false;
    }
}

/// Ultimate Oscillator: weighted combination of buying-pressure ratios over
/// three windows (`length`, `2*length`, `4*length`).
#[derive(Debug, Clone)]
pub struct UltimateOscillator {
    prev_close: Option<f64>,
    bp: VecDeque<f64>,
    tr: VecDeque<f64>,
    length: usize,
}

impl UltimateOscillator {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { prev_close: None, bp: VecDeque::with_capacity(4 * n), tr: VecDeque::with_capacity(4 * n), length: n }
    }
}

impl StreamingIndicator for UltimateOscillator {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let prev_close = self.prev_close.replace(bar.close.0);
        let pc = prev_close.unwrap_or(bar.close.0);
        let bp = bar.close.0 - bar.low.0.min(pc);
        let tr = bar.high.0.max(pc) - bar.low.0.min(pc);
        self.bp.push_back(bp);
        self.tr.push_back(tr);
        let cap = 4 * self.length;
        if self.bp.len() > cap {
            self.bp.pop_front();
            self.tr.pop_front();
        }
        if self.bp.len() < cap {
            return IndicatorOutput::single(f64::NAN);
        }
        let sum_window = |buf: &VecDeque<f64>, w: usize| -> f64 {
            buf.iter().rev().take(w).sum()
        };
        let bp1 = sum_window(&self.bp, self.length);
        let tr1 = sum_window(&self.tr, self.length);
        let bp2 = sum_window(&self.bp, 2 * self.length);
        let tr2 = sum_window(&self.tr, 2 * self.length);
        let bp4 = sum_window(&self.bp, 4 * self.length);
        let tr4 = sum_window(&self.tr, 4 * self.length);
        if tr1 == 0.0 || tr2 == 0.0 || tr4 == 0.0 {
            return IndicatorOutput::single(50.0);
        }
        let avg1 = bp1 / tr1;
        let avg2 = bp2 / tr2;
        let avg3 = bp4 / tr4;
        IndicatorOutput::single(100.0 * (4.0 * avg1 + 2.0 * avg2 + avg3) / 7.0)
    }
    fn is_ready(&self) -> bool {
        self.bp.len() >= 4 * self.length
    }
    fn warmup_bars(&self) -> usize {
        4 * self.length
    }
    fn reset(&mut self) {
        self.prev_close = None;
        self.bp.clear();
        self.tr.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(o), high: Price(h), low: Price(l), close: Price(c), volume: Quantity(100.0) }
    }

    #[test]
    fn rsi_flat_series_is_fifty() {
        let mut rsi = Rsi::new(3, InputSource::Close);
        let mut last = f64::NAN;
        for _ in 0..10 {
            last = rsi.push(&bar(10.0, 10.0, 10.0, 10.0)).value();
        }
        assert!((last - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_monotonic_up_is_hundred() {
        let mut rsi = Rsi::new(3, InputSource::Close);
        let mut last = f64::NAN;
        for i in 0..10 {
            last = rsi.push(&bar(100.0 + i as f64, 100.0 + i as f64, 100.0 + i as f64, 100.0 + i as f64)).value();
        }
        assert!((last - 100.0).abs() < 1e-9);
    }

    #[test]
    fn williams_r_bounded() {
        let mut w = WilliamsR::new(3);
        let mut last = f64::NAN;
        for i in 0..5 {
            last = w.push(&bar(100.0, 105.0 + i as f64, 95.0, 100.0 + i as f64)).value();
        }
        assert!(last <= 0.0 && last >= -100.0);
    }
}
