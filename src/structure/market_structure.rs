//! Market-structure detector (§4.C, depends on swing): ICT-style BOS/CHoCH.
//! `bias` tracks the prevailing trend direction; a break of the swing the
//! detector is currently watching *in the direction of bias* is a BOS
//! (continuation), a break *against* bias is a CHoCH (reversal) that flips
//! bias and starts watching the opposite swing.

use super::swing::SwingOutput;
use crate::bar::Bar;

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketStructureOutput {
    pub bias: i8,
    pub bos_this_bar: bool,
    pub choch_this_bar: bool,
    pub break_level_high: Option<f64>,
    pub break_level_low: Option<f64>,
    pub last_event_level: Option<f64>,
    pub last_event_idx: Option<usize>,
    pub version: u64,
}

impl MarketStructureOutput {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "bias" => Some(self.bias as f64),
            "bos_this_bar" => Some(self.bos_this_bar as i32 as f64),
            "choch_this_bar" => Some(self.choch_this_bar as i32 as f64),
            "break_level_high" => self.break_level_high,
            "break_level_low" => self.break_level_low,
            "last_event_level" => self.last_event_level,
            "last_event_idx" => self.last_event_idx.map(|i| i as f64),
            "version" => Some(self.version as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketStructureDetector {
    confirmation_close: bool,
    out: MarketStructureOutput,
    /// Which swing (by idx) produced the currently-watched high/low level —
    /// needed so a CHoCH is only valid against the *specific* swing that
    /// produced the last BOS, not any subsequent swing at the same price.
    watched_high_idx: Option<usize>,
    watched_low_idx: Option<usize>,
    idx: usize,
}

impl MarketStructureDetector {
    pub fn new(confirmation_close: bool) -> Self {
        Self {
            confirmation_close,
            out: MarketStructureOutput::default(),
            watched_high_idx: None,
            watched_low_idx: None,
            idx: 0,
        }
    }

    pub fn push(&mut self, bar: &Bar, swing: &SwingOutput) -> MarketStructureOutput {
        self.out.bos_this_bar = false;
        self.out.choch_this_bar = false;

        if let (Some(level), Some(idx)) = (swing.high_level, swing.high_idx) {
            if self.out.break_level_high.is_none() || self.watched_high_idx != Some(idx) {
                self.out.break_level_high = Some(level);
                self.watched_high_idx = Some(idx);
            }
        }
        if let (Some(level), Some(idx)) = (swing.low_level, swing.low_idx) {
            if self.out.break_level_low.is_none() || self.watched_low_idx != Some(idx) {
                self.out.break_level_low = Some(level);
                self.watched_low_idx = Some(idx);
            }
        }

        let breaks_above = |level: f64| -> bool {
            if self.confirmation_close {
                bar.close.0 > level
            } else {
                bar.high.0 > level
            }
        };
        let breaks_below = |level: f64| -> bool {
            if self.confirmation_close {
                bar.close.0 < level
            } else {
                bar.low.0 < level
            }
        };

        if let Some(level) = self.out.break_level_high {
            if breaks_above(level) {
                if self.out.bias >= 0 {
                    self.out.bias = 1;
                    self.out.bos_this_bar = true;
                } else {
                    self.out.bias = 1;
                    self.out.choch_this_bar = true;
                }
                self.out.last_event_level = Some(level);
                self.out.last_event_idx = Some(self.idx);
                self.out.version += 1;
                self.out.break_level_high = None;
                self.watched_high_idx = None;
            }
        }
        if let Some(level) = self.out.break_level_low {
            if breaks_below(level) {
                if self.out.bias <= 0 {
                    self.out.bias = -1;
                    self.out.bos_this_bar = true;
                } else {
                    self.out.bias = -1;
                    self.out.choch_this_bar = true;
                }
                self.out.last_event_level = Some(level);
                self.out.last_event_idx = Some(self.idx);
                self.out.version += 1;
                self.out.break_level_low = None;
                self.watched_low_idx = None;
            }
        }

        self.idx += 1;
        self.out
    }

    pub fn reset(&mut self) {
        self.out = MarketStructureOutput::default();
        self.watched_high_idx = None;
        self.watched_low_idx = None;
        self.idx = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(h: f64, l: f64, c: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(c), high: Price(h), low: Price(l), close: Price(c), volume: Quantity(1.0) }
    }
    fn swing_high(level: f64, idx: usize) -> SwingOutput {
        SwingOutput { high_level: Some(level), high_idx: Some(idx), ..Default::default() }
    }

    #[test]
    fn first_break_above_is_bos_from_neutral_bias() {
        let mut ms = MarketStructureDetector::new(false);
        ms.push(&bar(100.0, 95.0, 98.0), &swing_high(100.0, 0));
        let out = ms.push(&bar(105.0, 99.0, 101.0), &SwingOutput::default());
        assert!(out.bos_this_bar);
        assert_eq!(out.bias, 1);
    }

    #[test]
    fn break_against_established_bias_is_choch() {
        let mut ms = MarketStructureDetector::new(false);
        ms.push(&bar(100.0, 95.0, 98.0), &swing_high(100.0, 0));
        ms.push(&bar(105.0, 99.0, 101.0), &SwingOutput::default()); // BOS, bias=1
        let low_swing = SwingOutput { low_level: Some(90.0), low_idx: Some(2), ..Default::default() };
        ms.push(&bar(106.0, 91.0, 104.0), &low_swing);
        let out = ms.push(&bar(104.0, 85.0, 88.0), &SwingOutput::default());
        assert!(out.choch_this_bar);
        assert_eq!(out.bias, -1);
    }
}
