//! Zone detector (§4.C, depends on swing): a single demand/supply zone with
//! ACTIVE/BROKEN lifecycle, optionally widened by ATR.

use serde::{Deserialize, Serialize};

use super::swing::{PairDirection, SwingOutput};
use crate::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    None,
    Active,
    Broken,
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneOutput {
    pub state: ZoneState,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub anchor_idx: Option<usize>,
    pub version: u64,
}

impl Default for ZoneOutput {
    fn default() -> Self {
        Self { state: ZoneState::None, upper: None, lower: None, anchor_idx: None, version: 0 }
    }
}

impl ZoneOutput {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "state" => Some(match self.state {
                ZoneState::None => 0.0,
                ZoneState::Active => 1.0,
                ZoneState::Broken => -1.0,
            }),
            "upper" => self.upper,
            "lower" => self.lower,
            "anchor_idx" => self.anchor_idx.map(|i| i as f64),
            "version" => Some(self.version as f64),
            _ => None,
        }
    }
}

/// `is_demand = true` tracks a demand zone (built from swing lows, broken
/// when price trades below it); `false` tracks a supply zone (swing highs).
#[derive(Debug, Clone)]
pub struct ZoneDetector {
    is_demand: bool,
    atr_width_mult: Option<f64>,
    out: ZoneOutput,
    idx: usize,
}

impl ZoneDetector {
    pub fn new(is_demand: bool, atr_width_mult: Option<f64>) -> Self {
        Self { is_demand, atr_width_mult, out: ZoneOutput::default(), idx: 0 }
    }

    pub fn push(&mut self, bar: &Bar, swing: &SwingOutput, atr: Option<f64>) -> ZoneOutput {
        let anchor = if self.is_demand {
            swing.low_level.filter(|_| matches!(swing.pair_direction, Some(PairDirection::Bullish) | None)).map(|l| (l, swing.low_idx))
        } else {
            swing.high_level.map(|h| (h, swing.high_idx))
        };

        if let Some((level, anchor_idx)) = anchor {
            let width = self.atr_width_mult.zip(atr).map(|(m, a)| m * a).unwrap_or(level.abs() * 0.001);
            if self.is_demand {
                self.out.lower = Some(level - width);
                self.out.upper = Some(level + width);
            } else {
                self.out.upper = Some(level + width);
                self.out.lower = Some(level - width);
            }
            self.out.anchor_idx = anchor_idx;
            self.out.state = ZoneState::Active;
            self.out.version += 1;
        }

        if self.out.state == ZoneState::Active {
            if let (Some(lower), Some(upper)) = (self.out.lower, self.out.upper) {
                let broken = if self.is_demand { bar.close.0 < lower } else { bar.close.0 > upper };
                if broken {
                    self.out.state = ZoneState::Broken;
                    self.out.version += 1;
                }
            }
        }

        self.idx += 1;
        self.out
    }

    pub fn reset(&mut self) {
        self.out = ZoneOutput::default();
        self.idx = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Quantity};

    fn bar(c: f64) -> Bar {
        Bar { ts_open: 0, ts_close: 1, open: Price(c), high: Price(c), low: Price(c), close: Price(c), volume: Quantity(1.0) }
    }

    #[test]
    fn demand_zone_breaks_below_lower_bound() {
        let mut z = ZoneDetector::new(true, None);
        let swing = SwingOutput { low_level: Some(100.0), low_idx: Some(3), ..Default::default() };
        let out = z.push(&bar(105.0), &swing, None);
        assert_eq!(out.state, ZoneState::Active);
        let broken = z.push(&bar(95.0), &SwingOutput::default(), None);
        assert_eq!(broken.state, ZoneState::Broken);
    }
}
