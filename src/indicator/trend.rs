//! Trend indicators (7 types, §2 row B).

use std::collections::VecDeque;

use crate::bar::{Bar, InputSource};

use super::{Ewm, IndicatorOutput, RollingSum, StreamingIndicator};

/// MACD: fast EMA minus slow EMA, with a signal-line EMA and histogram.
#[derive(Debug, Clone)]
pub struct Macd {
    input: InputSource,
    fast: Ewm,
    slow: Ewm,
    signal: Ewm,
    warmup: usize,
}

impl Macd {
    pub fn new(fast: u32, slow: u32, signal: u32, input: InputSource) -> Self {
        let f = fast.max(1) as usize;
        let s = slow.max(1) as usize;
        let sig = signal.max(1) as usize;
        Self {
            input,
            fast: Ewm::new(2.0 / (f as f64 + 1.0), f),
            slow: Ewm::new(2.0 / (s as f64 + 1.0), s),
            signal: Ewm::new(2.0 / (sig as f64 + 1.0), sig),
            warmup: s + sig,
        }
    }
}

impl StreamingIndicator for Macd {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let v = self.input.extract(bar);
        let f = self.fast.update(v);
        let s = self.slow.update(v);
        match (f, s) {
            (Some(f), Some(s)) => {
                let macd = f - s;
                let sig = self.signal.update(macd);
                match sig {
                    Some(sig) => IndicatorOutput::named(&[("macd", macd), ("signal", sig), ("histogram", macd - sig)]),
                    None => IndicatorOutput::named(&[("macd", macd), ("signal", f64::NAN), ("histogram", f64::NAN)]),
                }
            }
            _ => IndicatorOutput::named(&[("macd", f64::NAN), ("signal", f64::NAN), ("histogram", f64::NAN)]),
        }
    }
    fn is_ready(&self) -> bool {
        self.signal.count > 0
    }
    fn warmup_bars(&self) -> usize {
        self.warmup
    }
    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["macd", "signal", "histogram"]
    }
}

/// Shared directional-movement bookkeeping used by both ADX and the plain DMI.
#[derive(Debug, Clone)]
struct DirectionalMovement {
    prev_bar: Option<(f64, f64, f64)>, // (high, low, close)
    plus_dm: Ewm,
    minus_dm: Ewm,
    tr: Ewm,
    length: usize,
}

impl DirectionalMovement {
    fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        let alpha = 1.0 / n as f64;
        Self {
            prev_bar: None,
            plus_dm: Ewm::new(alpha, n),
            minus_dm: Ewm::new(alpha, n),
            tr: Ewm::new(alpha, n),
            length: n,
        }
    }

    /// Returns `(+DI, -DI)` once warm.
    fn update(&mut self, bar: &Bar) -> Option<(f64, f64)> {
        let (ph, pl, pc) = match self.prev_bar.replace((bar.high.0, bar.low.0, bar.close.0)) {
            Some(t) => t,
            None => return None,
        };
        let up_move = bar.high.0 - ph;
        let down_move = pl - bar.low.0;
        let plus_dm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let minus_dm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
        let tr = (bar.high.0 - bar.low.0).max((bar.high.0 - pc).abs()).max((bar.low.0 - pc).abs());
        let pdm = self.plus_dm.update(plus_dm);
        let mdm = self.minus_dm.update(minus_dm);
        let atr = self.tr.update(tr);
        match (pdm, mdm, atr) {
            (Some(pdm), Some(mdm), Some(atr)) if atr > 0.0 => Some((100.0 * pdm / atr, 100.0 * mdm / atr)),
            (Some(_), Some(_), Some(_)) => Some((0.0, 0.0)),
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.prev_bar = None;
        self.plus_dm.reset();
        self.minus_dm.reset();
        self.tr.reset();
    }
}

/// Directional Movement Index: `+DI` / `-DI` without the ADX smoothing pass.
#[derive(Debug, Clone)]
pub struct Dmi {
    dm: DirectionalMovement,
    ready: bool,
}

impl Dmi {
    pub fn new(length: u32) -> Self {
        Self { dm: DirectionalMovement::new(length), ready: false }
    }
}

impl StreamingIndicator for Dmi {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        match self.dm.update(bar) {
            Some((plus, minus)) => {
                self.ready = true;
                IndicatorOutput::named(&[("plus_di", plus), ("minus_di", minus)])
            }
            None => IndicatorOutput::named(&[("plus_di", f64::NAN), ("minus_di", f64::NAN)]),
        }
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn warmup_bars(&self) -> usize {
        self.dm.length
    }
    fn reset(&mut self) {
        self.dm.reset();
        self.ready = false;
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["plus_di", "minus_di"]
    }
}

/// Average Directional Index: Wilder-smoothed mean of `DX = 100*|+DI - -DI| / (+DI + -DI)`.
#[derive(Debug, Clone)]
pub struct Adx {
    dm: DirectionalMovement,
    dx_smooth: Ewm,
    length: usize,
}

impl Adx {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { dm: DirectionalMovement::new(length), dx_smooth: Ewm::new(1.0 / n as f64, n), length: n }
    }
}

impl StreamingIndicator for Adx {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        match self.dm.update(bar) {
            Some((plus, minus)) => {
                let sum = plus + minus;
                let dx = if sum > 0.0 { 100.0 * (plus - minus).abs() / sum } else { 0.0 };
                IndicatorOutput::single(self.dx_smooth.update(dx).unwrap_or(f64::NAN))
            }
            None => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.dx_smooth.count >= self.length
    }
    fn warmup_bars(&self) -> usize {
        2 * self.length
    }
    fn reset(&mut self) {
        self.dm.reset();
        self.dx_smooth.reset();
    }
}

/// Aroon: bars-since-highest-high / bars-since-lowest-low, scaled to `[0,100]`.
#[derive(Debug, Clone)]
pub struct Aroon {
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    length: usize,
}

impl Aroon {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { highs: VecDeque::with_capacity(n + 1), lows: VecDeque::with_capacity(n + 1), length: n }
    }
}

impl StreamingIndicator for Aroon {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.highs.push_back(bar.high.0);
        self.lows.push_back(bar.low.0);
        if self.highs.len() > self.length + 1 {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.length + 1 {
            return IndicatorOutput::named(&[("up", f64::NAN), ("down", f64::NAN)]);
        }
        let n = self.highs.len();
        let (hi_idx, _) = self.highs.iter().enumerate().fold((0, f64::MIN), |acc, (i, v)| if *v >= acc.1 { (i, *v) } else { acc });
        let (lo_idx, _) = self.lows.iter().enumerate().fold((0, f64::MAX), |acc, (i, v)| if *v <= acc.1 { (i, *v) } else { acc });
        let bars_since_high = n - 1 - hi_idx;
        let bars_since_low = n - 1 - lo_idx;
        let up = 100.0 * (self.length - bars_since_high) as f64 / self.length as f64;
        let down = 100.0 * (self.length - bars_since_low) as f64 / self.length as f64;
        IndicatorOutput::named(&[("up", up), ("down", down)])
    }
    fn is_ready(&self) -> bool {
        self.highs.len() >= self.length + 1
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["up", "down"]
    }
}

/// Wilder's Parabolic SAR. Trend-following stop that accelerates toward price.
#[derive(Debug, Clone)]
pub struct ParabolicSar {
    af_step: f64,
    af_max: f64,
    af: f64,
    rising: bool,
    sar: Option<f64>,
    ep: f64,
    prev_bar: Option<(f64, f64)>, // high, low
    bars_seen: usize,
}

impl ParabolicSar {
    pub fn new(af_step: f64, af_max: f64) -> Self {
        Self { af_step, af_max, af: af_step, rising: true, sar: None, ep: f64::MIN, prev_bar: None, bars_seen: 0 }
    }
}

impl StreamingIndicator for ParabolicSar {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.bars_seen += 1;
        if self.sar.is_none() {
            self.sar = Some(bar.low.0);
            self.ep = bar.high.0;
            self.prev_bar = Some((bar.high.0, bar.low.0));
            return IndicatorOutput::single(f64::NAN);
        }
        let mut sar = self.sar.unwrap();
        sar += self.af * (self.ep - sar);

        if self.rising {
            if bar.low.0 < sar {
                self.rising = false;
                sar = self.ep;
                self.ep = bar.low.0;
                self.af = self.af_step;
            } else if bar.high.0 > self.ep {
                self.ep = bar.high.0;
                self.af = (self.af + self.af_step).min(self.af_max);
            }
        } else if bar.high.0 > sar {
            self.rising = true;
            sar = self.ep;
            self.ep = bar.high.0;
            self.af = self.af_step;
        } else if bar.low.0 < self.ep {
            self.ep = bar.low.0;
            self.af = (self.af + self.af_step).min(self.af_max);
        }

        self.sar = Some(sar);
        self.prev_bar = Some((bar.high.0, bar.low.0));
        IndicatorOutput::single(sar)
    }
    fn is_ready(&self) -> bool {
        self.bars_seen >= 2
    }
    fn warmup_bars(&self) -> usize {
        2
    }
    fn reset(&mut self) {
        self.af = self.af_step;
        self.rising = true;
        self.sar = None;
        self.ep = f64::MIN;
        self.prev_bar = None;
        self.bars_seen = 0;
    }
}

/// SuperTrend: ATR-band flip indicator; `direction` is `1` for uptrend, `-1` for downtrend.
#[derive(Debug, Clone)]
pub struct SuperTrend {
    atr: super::volatility::Atr,
    multiplier: f64,
    trend_up: bool,
    level: Option<f64>,
    length: usize,
}

impl SuperTrend {
    pub fn new(length: u32, multiplier: f64) -> Self {
        Self { atr: super::volatility::Atr::new(length), multiplier, trend_up: true, level: None, length: length.max(1) as usize }
    }
}

impl StreamingIndicator for SuperTrend {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let atr = self.atr.push(bar).value();
        if atr.is_nan() {
            return IndicatorOutput::named(&[("value", f64::NAN), ("direction", f64::NAN)]);
        }
        let hl2 = bar.hl2();
        let upper = hl2 + self.multiplier * atr;
        let lower = hl2 - self.multiplier * atr;
        let level = match self.level {
            None => {
                self.trend_up = bar.close.0 >= hl2;
                if self.trend_up { lower } else { upper }
            }
            Some(prev) => {
                if self.trend_up {
                    let new_lower = lower.max(prev);
                    if bar.close.0 < new_lower {
                        self.trend_up = false;
                        upper
                    } else {
                        new_lower
                    }
                } else {
                    let new_upper = upper.min(prev);
                    if bar.close.0 > new_upper {
                        self.trend_up = true;
                        lower
                    } else {
                        new_upper
                    }
                }
            }
        };
        self.level = Some(level);
        IndicatorOutput::named(&[("value", level), ("direction", if self.trend_up { 1.0 } else { -1.0 })])
    }
    fn is_ready(&self) -> bool {
        self.atr.is_ready()
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.atr.reset();
        self.trend_up = true;
        self.level = None;
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["value", "direction"]
    }
}

/// Ichimoku Kinko Hyo (core lines): tenkan-sen, kijun-sen, and the two
/// senkou spans (forward-projected, returned unshifted — the snapshot layer
/// applies the `+displacement` shift via `offset`, per §4.E).
#[derive(Debug, Clone)]
pub struct Ichimoku {
    tenkan_window: RollingHighLow,
    kijun_window: RollingHighLow,
    senkou_b_window: RollingHighLow,
    kijun_len: usize,
}

#[derive(Debug, Clone)]
struct RollingHighLow {
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    len: usize,
}

impl RollingHighLow {
    fn new(len: usize) -> Self {
        Self { highs: VecDeque::with_capacity(len), lows: VecDeque::with_capacity(len), len }
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        self.highs.push_back(bar.high.0);
        self.lows.push_back(bar.low.0);
        if self.highs.len() > self.len {
            self.highs.pop_front();
            self.lows.pop_front();
        }
        if self.highs.len() < self.len {
            return None;
        }
        let hh = self.highs.iter().cloned().fold(f64::MIN, f64::max);
        let ll = self.lows.iter().cloned().fold(f64::MAX, f64::min);
        Some((hh + ll) / 2.0)
    }

    fn reset(&mut self) {
        self.highs.clear();
        self.lows.clear();
    }
}

impl Ichimoku {
    pub fn new(tenkan: u32, kijun: u32, senkou_b: u32) -> Self {
        Self {
            tenkan_window: RollingHighLow::new(tenkan.max(1) as usize),
            kijun_window: RollingHighLow::new(kijun.max(1) as usize),
            senkou_b_window: RollingHighLow::new(senkou_b.max(1) as usize),
            kijun_len: kijun.max(1) as usize,
        }
    }
}

impl StreamingIndicator for Ichimoku {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let tenkan = self.tenkan_window.update(bar);
        let kijun = self.kijun_window.update(bar);
        let senkou_b = self.senkou_b_window.update(bar);
        let senkou_a = match (tenkan, kijun) {
            (Some(t), Some(k)) => Some((t + k) / 2.0),
            _ => None,
        };
        IndicatorOutput::named(&[
            ("tenkan", tenkan.unwrap_or(f64::NAN)),
            ("kijun", kijun.unwrap_or(f64::NAN)),
            ("senkou_a", senkou_a.unwrap_or(f64::NAN)),
            ("senkou_b", senkou_b.unwrap_or(f64::NAN)),
        ])
    }
    fn is_ready(&self) -> bool {
        self.kijun_window.highs.len() >= self.kijun_len
    }
    fn warmup_bars(&self) -> usize {
        self.kijun_len
    }
    fn reset(&mut self) {
        self.tenkan_window.reset();
        self.kijun_window.reset();
        self.senkou_b_window.reset();
    }
    fn output_keys(&self) -> &'static [&'static str] {
        &["tenkan", "kijun", "senkou_a", "senkou_b"]
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
    fn macd_histogram_is_macd_minus_signal() {
        let mut macd = Macd::new(3, 6, 3, InputSource::Close);
        let mut out = IndicatorOutput::default();
        for i in 0..20 {
            out = macd.push(&bar(100.0 + i as f64, 99.0 + i as f64, 100.0 + i as f64));
        }
        let hist = out.get("histogram").unwrap();
        let macd_v = out.get("macd").unwrap();
        let sig = out.get("signal").unwrap();
        assert!((hist - (macd_v - sig)).abs() < 1e-9);
    }

    #[test]
    fn aroon_up_is_100_on_fresh_high() {
        let mut a = Aroon::new(3);
        let mut last = IndicatorOutput::default();
        for i in 0..6 {
            last = a.push(&bar(100.0 + i as f64, 90.0, 95.0 + i as f64));
        }
        assert_eq!(last.get("up"), Some(100.0));
    }
}
