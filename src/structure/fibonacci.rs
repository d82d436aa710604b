//! Fibonacci levels (§4.C, depends on swing): retracement/extension levels
//! anchored either to the most recent paired pivot or to the last completed
//! trend wave (mutually exclusive anchor modes).

use super::swing::SwingOutput;
use super::trend::TrendOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FibAnchorMode {
    PairedPivot,
    LastWave,
}

#[derive(Debug, Clone, Default)]
pub struct FibonacciOutput {
    pub anchor_high: Option<f64>,
    pub anchor_low: Option<f64>,
    pub range: Option<f64>,
    pub anchor_direction: Option<i8>,
    pub anchor_hash: u64,
    /// `(ratio, level)` pairs, in the order the ratios were declared.
    pub levels: Vec<(f64, f64)>,
}

impl FibonacciOutput {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "anchor_high" => self.anchor_high,
            "anchor_low" => self.anchor_low,
            "range" => self.range,
            "anchor_direction" => self.anchor_direction.map(|d| d as f64),
            "anchor_hash" => Some(self.anchor_hash as f64),
            _ => None,
        }
    }

    /// Level lookup by ratio, formatted with `:g` semantics upstream (the
    /// snapshot layer strips trailing zeros before calling here; this just
    /// matches by float equality on the already-parsed ratio).
    pub fn level(&self, ratio: f64) -> Option<f64> {
        self.levels.iter().find(|(r, _)| (*r - ratio).abs() < 1e-9).map(|(_, lvl)| *lvl)
    }
}

#[derive(Debug, Clone)]
pub struct FibonacciDetector {
    mode: FibAnchorMode,
    ratios: Vec<f64>,
    extension: bool,
    out: FibonacciOutput,
}

impl FibonacciDetector {
    pub fn new(mode: FibAnchorMode, ratios: Vec<f64>, extension: bool) -> Self {
        Self { mode, ratios, extension, out: FibonacciOutput::default() }
    }

    fn recompute(&mut self, high: f64, low: f64, direction: i8, hash: u64) {
        let range = high - low;
        self.out.anchor_high = Some(high);
        self.out.anchor_low = Some(low);
        self.out.range = Some(range);
        self.out.anchor_direction = Some(direction);
        self.out.anchor_hash = hash;
        self.out.levels = self
            .ratios
            .iter()
            .map(|&r| {
                let level = if self.extension {
                    if direction >= 0 { high + r * range } else { low - r * range }
                } else {
                    high - r * range
                };
                (r, level)
            })
            .collect();
    }

    pub fn push(&mut self, swing: &SwingOutput, trend: Option<&TrendOutput>) -> FibonacciOutput {
        match self.mode {
            FibAnchorMode::PairedPivot => {
                if let (Some(hi), Some(lo)) = (swing.pair_high, swing.pair_low) {
                    if swing.pair_version > 0 {
                        let dir = match swing.pair_direction {
                            Some(super::swing::PairDirection::Bullish) => 1,
                            Some(super::swing::PairDirection::Bearish) => -1,
                            None => 0,
                        };
                        self.recompute(hi, lo, dir, swing.pair_anchor_hash);
                    }
                }
            }
            FibAnchorMode::LastWave => {
                if let (Some(hi), Some(lo), Some(t)) = (swing.pair_high, swing.pair_low, trend) {
                    self.recompute(hi, lo, t.direction, swing.pair_anchor_hash);
                }
            }
        }
        self.out.clone()
    }

    pub fn reset(&mut self) {
        self.out = FibonacciOutput::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::swing::PairDirection;

    #[test]
    fn retracement_level_between_anchor_bounds() {
        let mut fib = FibonacciDetector::new(FibAnchorMode::PairedPivot, vec![0.382, 0.618], false);
        let swing = SwingOutput {
            pair_high: Some(110.0),
            pair_low: Some(100.0),
            pair_direction: Some(PairDirection::Bullish),
            pair_version: 1,
            pair_anchor_hash: 42,
            ..Default::default()
        };
        let out = fib.push(&swing, None);
        let lvl = out.level(0.618).unwrap();
        assert!(lvl > 100.0 && lvl < 110.0);
    }
}
