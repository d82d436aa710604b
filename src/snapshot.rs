//! Runtime snapshot (§4.E): an immutable, array-addressed view into prices,
//! features, and structures at a specific `(exec_idx, minute_idx)`. Every
//! DSL reference is compiled once, at load time, into a `Ref` — resolution
//! here never re-parses a string (§9 design notes).

use std::collections::HashMap;

use crate::feed::{FeedStore, TimeframeRole};
use crate::structure::StructureOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OhlcvField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

/// A DSL reference, fully resolved at compile time (§9 design notes' `Ref`
/// enum). `offset` is always in bars of the reference's own timeframe role,
/// counted backward from the current bar in that role.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref {
    PriceMark,
    PriceLast,
    Ohlcv(OhlcvField, TimeframeRole, i64),
    Feature(TimeframeRole, String, i64),
    Structure(TimeframeRole, String, String),
    StructureZoneSlot(TimeframeRole, String, usize, String),
    FibLevel(TimeframeRole, String, String),
    Literal(f64),
}

/// The live view the DSL evaluator reads from, constructed once per 1-minute
/// step (§4.J step 2c). `structures` holds this bar's freshly computed
/// structure outputs, keyed by `(role, structure_id)`.
pub struct Snapshot<'a> {
    pub feed: &'a FeedStore,
    pub exec_idx: usize,
    pub med_idx: Option<usize>,
    pub high_idx: Option<usize>,
    pub mark_price: f64,
    pub last_price: f64,
    pub structures: &'a HashMap<(TimeframeRole, String), StructureOutput>,
}

impl<'a> Snapshot<'a> {
    fn role_idx(&self, role: TimeframeRole) -> Option<usize> {
        match role {
            TimeframeRole::Exec => Some(self.exec_idx),
            TimeframeRole::Med => self.med_idx,
            TimeframeRole::High => self.high_idx,
        }
    }

    /// Minutes-per-bar for `role`, used by the DSL evaluator to scale
    /// `anchor_tf`-relative window bar counts onto the exec timeframe.
    pub fn tf_minutes(&self, role: TimeframeRole) -> Option<u32> {
        self.feed.role(role)?.tf.map(|tf| tf.tf_minutes())
    }

    /// Resolves one compiled `Ref` to a value, or `None` for MISSING
    /// (out-of-history, NaN, or an unresolved structure/feature). Callers
    /// never see NaN directly — §4.E propagates MISSING as `None`.
    pub fn resolve(&self, r: &Ref) -> Option<f64> {
        match r {
            Ref::Literal(v) => Some(*v),
            Ref::PriceMark => Some(self.mark_price),
            Ref::PriceLast => Some(self.last_price),
            Ref::Ohlcv(field, role, offset) => {
                let store = self.feed.role(*role)?;
                let idx = self.role_idx(*role)?;
                let target = (idx as i64) - offset;
                if target < 0 {
                    return None;
                }
                let target = target as usize;
                let v = match field {
                    OhlcvField::Open => store.open.get(target).copied(),
                    OhlcvField::High => store.high.get(target).copied(),
                    OhlcvField::Low => store.low.get(target).copied(),
                    OhlcvField::Close => store.close.get(target).copied(),
                    OhlcvField::Volume => store.volume.get(target).copied(),
                };
                v.filter(|v| !v.is_nan())
            }
            Ref::Feature(role, column, offset) => {
                let store = self.feed.role(*role)?;
                let idx = self.role_idx(*role)?;
                let target = (idx as i64) - offset;
                if target < 0 {
                    return None;
                }
                store.feature_value(column, target as usize).filter(|v| !v.is_nan())
            }
            Ref::Structure(role, key, field) => {
                self.structures.get(&(*role, key.clone())).and_then(|s| s.field(field))
            }
            Ref::StructureZoneSlot(role, key, slot, field) => {
                self.structures.get(&(*role, key.clone())).and_then(|s| s.zone_slot_field(*slot, field))
            }
            Ref::FibLevel(role, key, ratio_str) => {
                let ratio: f64 = ratio_str.parse().ok()?;
                self.structures.get(&(*role, key.clone())).and_then(|s| s.fib_level(ratio))
            }
        }
    }
}

/// Formats a fibonacci ratio with `:g` semantics (strip trailing zeros),
/// matching the path syntax `fib.level[r]` from §4.E.
pub fn format_ratio_g(ratio: f64) -> String {
    let s = format!("{ratio}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::domain::{Price, Volume};
    use crate::feed::{build_role_store, RoleStore};
    use crate::time::Timeframe;

    fn mk_feed() -> FeedStore {
        let bars: Vec<Bar> = (0..5)
            .map(|i| Bar {
                ts_open: i * 60_000,
                ts_close: i * 60_000 + 60_000,
                open: Price(100.0 + i as f64),
                high: Price(101.0 + i as f64),
                low: Price(99.0 + i as f64),
                close: Price(100.0 + i as f64),
                volume: Volume(1.0),
            })
            .collect();
        let exec = build_role_store(Timeframe::M1, bars.clone(), &[]);
        FeedStore { exec, med: None, high: None, quote_1m: RoleStore::default() }
    }

    #[test]
    fn resolves_offset_close() {
        let feed = mk_feed();
        let structures = HashMap::new();
        let snap = Snapshot { feed: &feed, exec_idx: 4, med_idx: None, high_idx: None, mark_price: 104.0, last_price: 104.0, structures: &structures };
        let v = snap.resolve(&Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 0));
        assert_eq!(v, Some(104.0));
        let prev = snap.resolve(&Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 1));
        assert_eq!(prev, Some(103.0));
    }

    #[test]
    fn out_of_history_offset_is_missing() {
        let feed = mk_feed();
        let structures = HashMap::new();
        let snap = Snapshot { feed: &feed, exec_idx: 1, med_idx: None, high_idx: None, mark_price: 101.0, last_price: 101.0, structures: &structures };
        assert_eq!(snap.resolve(&Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 5)), None);
    }

    #[test]
    fn ratio_g_format_strips_trailing_zeros() {
        assert_eq!(format_ratio_g(0.618), "0.618");
        assert_eq!(format_ratio_g(0.500), "0.5");
        assert_eq!(format_ratio_g(1.0), "1");
    }
}
