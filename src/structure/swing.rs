//! Swing pivot detector (§4.C): confirms a high/low pivot `right` bars after
//! its occurrence, once no bar in `[i-left, i+right]` exceeds it. Maintains
//! paired-pivot state (most recent low→high or high→low swing).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairDirection {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwingOutput {
    pub high_level: Option<f64>,
    pub high_idx: Option<usize>,
    pub low_level: Option<f64>,
    pub low_idx: Option<usize>,
    pub pair_high: Option<f64>,
    pub pair_low: Option<f64>,
    pub pair_direction: Option<PairDirection>,
    pub pair_version: u64,
    pub pair_anchor_hash: u64,
    pub high_version: u64,
    pub low_version: u64,
    pub version: u64,
}

impl SwingOutput {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "high_level" => self.high_level,
            "high_idx" => self.high_idx.map(|i| i as f64),
            "low_level" => self.low_level,
            "low_idx" => self.low_idx.map(|i| i as f64),
            "pair_high" => self.pair_high,
            "pair_low" => self.pair_low,
            "pair_direction" => self.pair_direction.map(|d| match d {
                PairDirection::Bullish => 1.0,
                PairDirection::Bearish => -1.0,
            }),
            "pair_version" => Some(self.pair_version as f64),
            "high_version" => Some(self.high_version as f64),
            "low_version" => Some(self.low_version as f64),
            "version" => Some(self.version as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    idx: usize,
    high: f64,
    low: f64,
}

#[derive(Debug, Clone)]
pub struct SwingDetector {
    left: usize,
    right: usize,
    min_atr_move: Option<f64>,
    buf: VecDeque<Candidate>,
    idx: usize,
    last_high: Option<(usize, f64)>,
    last_low: Option<(usize, f64)>,
    out: SwingOutput,
}

impl SwingDetector {
    pub fn new(left: u32, right: u32, min_atr_move: Option<f64>) -> Self {
        let window = left as usize + right as usize + 1;
        Self {
            left: left as usize,
            right: right as usize,
            min_atr_move,
            buf: VecDeque::with_capacity(window),
            idx: 0,
            last_high: None,
            last_low: None,
            out: SwingOutput::default(),
        }
    }

    fn anchor_hash(hi_idx: usize, lo_idx: usize) -> u64 {
        hi_idx as u64 ^ ((lo_idx as u64) << 32).wrapping_add(0x9E37_79B9_7F4A_7C15)
    }

    /// `atr` is the current ATR value at this bar, used only when
    /// `min_atr_move` is configured (otherwise any confirmed pivot counts).
    pub fn push(&mut self, bar: &Bar, atr: Option<f64>) -> SwingOutput {
        let window = self.left + self.right + 1;
        self.out.high_level = None;
        self.out.low_level = None;
        self.buf.push_back(Candidate { idx: self.idx, high: bar.high.0, low: bar.low.0 });
        if self.buf.len() > window {
            self.buf.pop_front();
        }
        if self.buf.len() == window {
            let mid = self.buf[self.left];
            let is_pivot_high = self.buf.iter().all(|c| c.high <= mid.high);
            let is_pivot_low = self.buf.iter().all(|c| c.low >= mid.low);
            let move_ok = |level: f64, prior: Option<(usize, f64)>| -> bool {
                match (self.min_atr_move, atr, prior) {
                    (Some(mult), Some(atr), Some((_, prior_level))) => {
                        (level - prior_level).abs() >= mult * atr
                    }
                    _ => true,
                }
            };
            if is_pivot_high && move_ok(mid.high, self.last_high) {
                self.out.high_level = Some(mid.high);
                self.out.high_idx = Some(mid.idx);
                self.out.high_version += 1;
                self.last_high = Some((mid.idx, mid.high));
                if let Some((lo_idx, lo_level)) = self.last_low {
                    if lo_idx < mid.idx {
                        self.out.pair_high = Some(mid.high);
                        self.out.pair_low = Some(lo_level);
                        self.out.pair_direction = Some(PairDirection::Bullish);
                        self.out.pair_version += 1;
                        self.out.pair_anchor_hash = Self::anchor_hash(mid.idx, lo_idx);
                    }
                }
            }
            if is_pivot_low && move_ok(mid.low, self.last_low) {
                self.out.low_level = Some(mid.low);
                self.out.low_idx = Some(mid.idx);
                self.out.low_version += 1;
                self.last_low = Some((mid.idx, mid.low));
                if let Some((hi_idx, hi_level)) = self.last_high {
                    if hi_idx < mid.idx {
                        self.out.pair_high = Some(hi_level);
                        self.out.pair_low = Some(mid.low);
                        self.out.pair_direction = Some(PairDirection::Bearish);
                        self.out.pair_version += 1;
                        self.out.pair_anchor_hash = Self::anchor_hash(hi_idx, mid.idx);
                    }
                }
            }
            if self.out.high_level.is_some() || self.out.low_level.is_some() {
                self.out.version += 1;
            }
        }
        self.idx += 1;
        self.out
    }

    pub fn is_ready(&self) -> bool {
        self.buf.len() >= self.left + self.right + 1
    }

    pub fn warmup_bars(&self) -> usize {
        self.left + self.right + 1
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.idx = 0;
        self.last_high = None;
        self.last_low = None;
        self.out = SwingOutput::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(h: f64, l: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(h), high: Price(h), low: Price(l), close: Price(h), volume: Quantity(1.0) }
    }

    #[test]
    fn confirms_high_pivot_after_right_bars() {
        let mut sw = SwingDetector::new(1, 1, None);
        sw.push(&bar(100.0, 90.0));
        sw.push(&bar(110.0, 95.0));
        let out = sw.push(&bar(105.0, 92.0));
        assert_eq!(out.high_level, Some(110.0));
        assert_eq!(out.high_idx, Some(1));
    }

    #[test]
    fn pairs_low_then_high_as_bullish() {
        let mut sw = SwingDetector::new(1, 1, None);
        sw.push(&bar(100.0, 95.0));
        sw.push(&bar(101.0, 90.0)); // low pivot here confirmed next bar
        sw.push(&bar(102.0, 96.0));
        sw.push(&bar(120.0, 97.0));
        let out = sw.push(&bar(103.0, 96.0));
        assert_eq!(out.pair_direction, Some(PairDirection::Bullish));
    }
}
