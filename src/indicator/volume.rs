//! Volume indicators (4 types, §2 row B).

use crate::bar::Bar;

use super::{IndicatorOutput, RollingSum, StreamingIndicator};

/// On-Balance Volume: running sum of signed volume by close direction.
#[derive(Debug, Clone, Default)]
pub struct Obv {
    prev_close: Option<f64>,
    value: f64,
}

impl Obv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for Obv {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        if let Some(pc) = self.prev_close {
            if bar.close.0 > pc {
                self.value += bar.volume.0;
            } else if bar.close.0 < pc {
                self.value -= bar.volume.0;
            }
        }
        self.prev_close = Some(bar.close.0);
        IndicatorOutput::single(self.value)
    }
    fn is_ready(&self) -> bool {
        self.prev_close.is_some()
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.prev_close = None;
        self.value = 0.0;
    }
}

/// Volume-Weighted Average Price, accumulated since the kernel was reset
/// (i.e. since the start of the feed; session-scoped VWAP is a Play-level
/// reset concern, not an indicator-kernel one).
#[derive(Debug, Clone, Default)]
pub struct Vwap {
    cum_pv: f64,
    cum_vol: f64,
}

impl Vwap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for Vwap {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        self.cum_pv += bar.hlc3() * bar.volume.0;
        self.cum_vol += bar.volume.0;
        IndicatorOutput::single(if self.cum_vol > 0.0 { self.cum_pv / self.cum_vol } else { f64::NAN })
    }
    fn is_ready(&self) -> bool {
        self.cum_vol > 0.0
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.cum_pv = 0.0;
        self.cum_vol = 0.0;
    }
}

/// Accumulation/Distribution Line: running sum of the money-flow-volume term.
#[derive(Debug, Clone, Default)]
pub struct AccumulationDistribution {
    value: f64,
    seen: usize,
}

impl AccumulationDistribution {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamingIndicator for AccumulationDistribution {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let range = bar.high.0 - bar.low.0;
        let mfm = if range > 0.0 {
            ((bar.close.0 - bar.low.0) - (bar.high.0 - bar.close.0)) / range
        } else {
            0.0
        };
        self.value += mfm * bar.volume.0;
        self.seen += 1;
        IndicatorOutput::single(self.value)
    }
    fn is_ready(&self) -> bool {
        self.seen >= 1
    }
    fn warmup_bars(&self) -> usize {
        1
    }
    fn reset(&mut self) {
        self.value = 0.0;
        self.seen = 0;
    }
}

/// Chaikin Money Flow: rolling-window ratio of money-flow-volume to volume.
#[derive(Debug, Clone)]
pub struct ChaikinMoneyFlow {
    mfv: RollingSum,
    vol: RollingSum,
    length: usize,
}

impl ChaikinMoneyFlow {
    pub fn new(length: u32) -> Self {
        let n = length.max(1) as usize;
        Self { mfv: RollingSum::new(n), vol: RollingSum::new(n), length: n }
    }
}

impl StreamingIndicator for ChaikinMoneyFlow {
    fn push(&mut self, bar: &Bar) -> IndicatorOutput {
        let range = bar.high.0 - bar.low.0;
        let mfm = if range > 0.0 {
            ((bar.close.0 - bar.low.0) - (bar.high.0 - bar.close.0)) / range
        } else {
            0.0
        };
        let mfv_sum = self.mfv.update(mfm * bar.volume.0);
        let vol_sum = self.vol.update(bar.volume.0);
        match (mfv_sum, vol_sum) {
            (Some(m), Some(v)) if v > 0.0 => IndicatorOutput::single(m / v),
            (Some(_), Some(_)) => IndicatorOutput::single(0.0),
            _ => IndicatorOutput::single(f64::NAN),
        }
    }
    fn is_ready(&self) -> bool {
        self.vol.len() >= self.length
    }
    fn warmup_bars(&self) -> usize {
        self.length
    }
    fn reset(&mut self) {
        self.mfv.reset();
        self.vol.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(h: f64, l: f64, c: f64, v: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(c), high: Price(h), low: Price(l), close: Price(c), volume: Quantity(v) }
    }

    #[test]
    fn obv_accumulates_on_higher_close() {
        let mut obv = Obv::new();
        obv.push(&bar(101.0, 99.0, 100.0, 10.0));
        let v = obv.push(&bar(103.0, 100.0, 102.0, 5.0)).value();
        assert!((v - 5.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_is_weighted_toward_higher_volume_bar() {
        let mut vwap = Vwap::new();
        vwap.push(&bar(101.0, 99.0, 100.0, 1.0));
        let v = vwap.push(&bar(111.0, 109.0, 110.0, 100.0)).value();
        assert!(v > 105.0);
    }

    #[test]
    fn cmf_is_bounded() {
        let mut cmf = ChaikinMoneyFlow::new(3);
        let mut last = f64::NAN;
        for i in 0..5 {
            last = cmf.push(&bar(110.0 + i as f64, 90.0, 105.0 + i as f64, 10.0)).value();
        }
        assert!(last >= -1.0 && last <= 1.0);
    }
}
