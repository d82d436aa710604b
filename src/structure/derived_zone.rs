//! Derived-zone detector (§4.C, K slots, depends on a source swing): tracks
//! up to `max_active` fibonacci-ratio zones around newly paired pivots;
//! FIFO-by-creation eviction when a K+1-th would become active (§9 open
//! question, resolved in DESIGN.md/SPEC_FULL.md §9.4).

use serde::{Deserialize, Serialize};

use super::swing::SwingOutput;
use crate::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Active,
    Broken,
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneSlot {
    pub lower: f64,
    pub upper: f64,
    pub state: SlotState,
    pub anchor_idx: usize,
    pub age_bars: u64,
    pub touched_this_bar: bool,
    pub touch_count: u64,
    pub last_touch_age: Option<u64>,
    pub inside: bool,
    pub instance_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DerivedZoneOutput {
    pub slots: Vec<ZoneSlot>,
    pub active_count: usize,
    pub any_active: bool,
    pub any_touched: bool,
    pub any_inside: bool,
}

impl DerivedZoneOutput {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "active_count" => Some(self.active_count as f64),
            "any_active" => Some(self.any_active as i32 as f64),
            "any_touched" => Some(self.any_touched as i32 as f64),
            "any_inside" => Some(self.any_inside as i32 as f64),
            _ => None,
        }
    }

    pub fn slot_field(&self, slot: usize, field: &str) -> Option<f64> {
        let s = self.slots.get(slot)?;
        match field {
            "lower" => Some(s.lower),
            "upper" => Some(s.upper),
            "state" => Some(if s.state == SlotState::Active { 1.0 } else { 0.0 }),
            "anchor_idx" => Some(s.anchor_idx as f64),
            "age_bars" => Some(s.age_bars as f64),
            "touched_this_bar" => Some(s.touched_this_bar as i32 as f64),
            "touch_count" => Some(s.touch_count as f64),
            "last_touch_age" => s.last_touch_age.map(|v| v as f64),
            "inside" => Some(s.inside as i32 as f64),
            "instance_id" => Some(s.instance_id as f64),
            _ => None,
        }
    }

    /// The most recently created ACTIVE slot, if any.
    pub fn newest_active(&self) -> Option<&ZoneSlot> {
        self.slots.iter().filter(|s| s.state == SlotState::Active).max_by_key(|s| s.instance_id)
    }
}

#[derive(Debug, Clone)]
pub struct DerivedZoneDetector {
    max_active: usize,
    ratios: Vec<f64>,
    next_instance_id: u64,
    last_pair_version: u64,
    out: DerivedZoneOutput,
}

impl DerivedZoneDetector {
    pub fn new(max_active: usize, ratios: Vec<f64>) -> Self {
        Self { max_active, ratios, next_instance_id: 0, last_pair_version: 0, out: DerivedZoneOutput::default() }
    }

    pub fn push(&mut self, bar: &Bar, swing: &SwingOutput) -> DerivedZoneOutput {
        for s in self.out.slots.iter_mut() {
            s.age_bars += 1;
            s.touched_this_bar = false;
        }

        if swing.pair_version > 0 && swing.pair_version != self.last_pair_version {
            self.last_pair_version = swing.pair_version;
            if let (Some(hi), Some(hi_idx), Some(lo)) = (swing.pair_high, swing.high_idx, swing.pair_low) {
                let range = hi - lo;
                for &r in &self.ratios {
                    let center = hi - r * range;
                    let half_width = (range * 0.01).max(f64::EPSILON);
                    let active_count =
                        self.out.slots.iter().filter(|s| s.state == SlotState::Active).count();
                    if active_count >= self.max_active {
                        if let Some(evict_pos) = self
                            .out
                            .slots
                            .iter()
                            .enumerate()
                            .filter(|(_, s)| s.state == SlotState::Active)
                            .min_by_key(|(_, s)| s.instance_id)
                            .map(|(i, _)| i)
                        {
                            self.out.slots.remove(evict_pos);
                        }
                    }
                    self.out.slots.retain(|s| s.state != SlotState::Broken);
                    self.out.slots.push(ZoneSlot {
                        lower: center - half_width,
                        upper: center + half_width,
                        state: SlotState::Active,
                        anchor_idx: hi_idx,
                        age_bars: 0,
                        touched_this_bar: false,
                        touch_count: 0,
                        last_touch_age: None,
                        inside: false,
                        instance_id: self.next_instance_id,
                    });
                    self.next_instance_id += 1;
                }
            }
        }

        for s in self.out.slots.iter_mut() {
            if s.state != SlotState::Active {
                continue;
            }
            let touched = bar.price_reached(s.lower) || bar.price_reached(s.upper) || (bar.low.0 <= s.upper && bar.high.0 >= s.lower);
            if touched {
                s.touched_this_bar = true;
                s.touch_count += 1;
                s.last_touch_age = Some(0);
            } else if let Some(age) = s.last_touch_age {
                s.last_touch_age = Some(age + 1);
            }
            s.inside = bar.close.0 >= s.lower && bar.close.0 <= s.upper;
        }

        self.out.active_count = self.out.slots.iter().filter(|s| s.state == SlotState::Active).count();
        self.out.any_active = self.out.active_count > 0;
        self.out.any_touched = self.out.slots.iter().any(|s| s.touched_this_bar);
        self.out.any_inside = self.out.slots.iter().any(|s| s.inside);
        self.out.clone()
    }

    pub fn reset(&mut self) {
        self.out = DerivedZoneOutput::default();
        self.next_instance_id = 0;
        self.last_pair_version = 0;
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
    fn evicts_oldest_active_when_kplus1th_forms() {
        let mut dz = DerivedZoneDetector::new(1, vec![0.5]);
        let swing1 = SwingOutput { pair_high: Some(110.0), high_idx: Some(1), pair_low: Some(100.0), pair_version: 1, ..Default::default() };
        dz.push(&bar(105.0), &swing1);
        let swing2 = SwingOutput { pair_high: Some(120.0), high_idx: Some(5), pair_low: Some(90.0), pair_version: 1, ..Default::default() };
        let out = dz.push(&bar(105.0), &swing2);
        assert_eq!(out.active_count, 1);
        assert_eq!(out.slots[0].anchor_idx, 5);
    }
}
