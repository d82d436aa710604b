//! Feed store (§4.D): precomputed, per-timeframe-role columnar store built
//! from historical OHLCV plus every declared Feature/Structure. Owns the
//! `ts_close -> idx` forward-fill map so the snapshot layer never repeats
//! binary search logic (§9 design notes resolve the dual-close-detection
//! open question to this single map).

use std::collections::HashMap;

use crate::bar::Bar;
use crate::indicator::{build as build_indicator, IndicatorKind, IndicatorParams, StreamingIndicator};
use crate::time::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeframeRole {
    Exec,
    Med,
    High,
}

/// A compiled Feature: registry kind, parameters, and declared output keys.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub id: String,
    pub kind: IndicatorKind,
    pub params: IndicatorParams,
    pub input: crate::bar::InputSource,
}

/// Columnar store for a single timeframe role: aligned OHLCV arrays plus one
/// array per declared feature output.
#[derive(Debug, Clone, Default)]
pub struct RoleStore {
    pub tf: Option<Timeframe>,
    pub ts_open: Vec<i64>,
    pub ts_close: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    /// `feature_id.output_key -> column`
    pub feature_columns: HashMap<String, Vec<f64>>,
}

impl RoleStore {
    pub fn len(&self) -> usize {
        self.ts_close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts_close.is_empty()
    }

    pub fn bar_at(&self, idx: usize) -> Option<Bar> {
        if idx >= self.len() {
            return None;
        }
        Some(Bar {
            ts_open: self.ts_open[idx],
            ts_close: self.ts_close[idx],
            open: crate::domain::Price(self.open[idx]),
            high: crate::domain::Price(self.high[idx]),
            low: crate::domain::Price(self.low[idx]),
            close: crate::domain::Price(self.close[idx]),
            volume: crate::domain::Volume(self.volume[idx]),
        })
    }

    /// O(1) forward-fill accessor: the last idx in this role whose
    /// `ts_close <= target_ts_close`. Binary search over the monotonic
    /// `ts_close` array — O(log n), effectively O(1) against the hot loop's
    /// per-bar cost dominated by DSL evaluation.
    pub fn last_closed_at_or_before(&self, target_ts_close: i64) -> Option<usize> {
        if self.ts_close.is_empty() {
            return None;
        }
        match self.ts_close.binary_search(&target_ts_close) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        }
    }

    pub fn feature_value(&self, key: &str, idx: usize) -> Option<f64> {
        self.feature_columns.get(key).and_then(|col| col.get(idx)).copied()
    }
}

/// Builds a `RoleStore` by running each declared feature's incremental
/// kernel over the bar stream once, column-by-column (§8.3: incremental
/// parity — this is the *only* place indicator kernels run during a build).
pub fn build_role_store(tf: Timeframe, bars: Vec<Bar>, features: &[FeatureSpec]) -> RoleStore {
    let n = bars.len();
    let mut store = RoleStore {
        tf: Some(tf),
        ts_open: Vec::with_capacity(n),
        ts_close: Vec::with_capacity(n),
        open: Vec::with_capacity(n),
        high: Vec::with_capacity(n),
        low: Vec::with_capacity(n),
        close: Vec::with_capacity(n),
        volume: Vec::with_capacity(n),
        feature_columns: HashMap::new(),
    };

    let mut kernels: Vec<(String, Box<dyn StreamingIndicator>)> = features
        .iter()
        .map(|f| (f.id.clone(), build_indicator(f.kind, f.params, f.input)))
        .collect();

    for (id, kernel) in &kernels {
        for key in kernel.output_keys() {
            let col_name = if *key == "value" { id.clone() } else { format!("{id}.{key}") };
            store.feature_columns.entry(col_name).or_insert_with(|| Vec::with_capacity(n));
        }
    }

    for bar in &bars {
        store.ts_open.push(bar.ts_open);
        store.ts_close.push(bar.ts_close);
        store.open.push(bar.open.0);
        store.high.push(bar.high.0);
        store.low.push(bar.low.0);
        store.close.push(bar.close.0);
        store.volume.push(bar.volume.0);

        for (id, kernel) in kernels.iter_mut() {
            let out = kernel.push(bar);
            let ready = kernel.is_ready();
            for nv in out.0.iter() {
                let col_name = if nv.key == "value" { id.clone() } else { format!("{id}.{}", nv.key) };
                let col = store.feature_columns.entry(col_name).or_insert_with(|| Vec::with_capacity(n));
                col.push(if ready { nv.value } else { f64::NAN });
            }
        }
    }

    store
}

/// Full feed store: one `RoleStore` per declared timeframe role, plus the
/// always-loaded 1-minute quote feed used for execution/fills/TP-SL.
#[derive(Debug, Clone, Default)]
pub struct FeedStore {
    pub exec: RoleStore,
    pub med: Option<RoleStore>,
    pub high: Option<RoleStore>,
    pub quote_1m: RoleStore,
}

impl FeedStore {
    pub fn role(&self, role: TimeframeRole) -> Option<&RoleStore> {
        match role {
            TimeframeRole::Exec => Some(&self.exec),
            TimeframeRole::Med => self.med.as_ref(),
            TimeframeRole::High => self.high.as_ref(),
        }
    }

    /// Maps an exec bar's close to the forward-filled index in `role`.
    pub fn htf_idx_for_exec(&self, role: TimeframeRole, exec_idx: usize) -> Option<usize> {
        let target = self.exec.ts_close.get(exec_idx).copied()?;
        self.role(role)?.last_closed_at_or_before(target)
    }

    /// 1-minute indices covering `[exec.ts_open[idx], exec.ts_close[idx])`.
    pub fn minute_range_for_exec(&self, exec_idx: usize) -> std::ops::Range<usize> {
        let Some(open) = self.exec.ts_open.get(exec_idx).copied() else { return 0..0 };
        let Some(close) = self.exec.ts_close.get(exec_idx).copied() else { return 0..0 };
        let start = self.quote_1m.ts_open.partition_point(|&t| t < open);
        let end = self.quote_1m.ts_open.partition_point(|&t| t < close);
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::InputSource;
    use crate::domain::{Price, Volume};

    fn mk_bar(ts_open: i64, c: f64) -> Bar {
        Bar { ts_open, ts_close: ts_open + 60_000, open: Price(c), high: Price(c + 1.0), low: Price(c - 1.0), close: Price(c), volume: Volume(1.0) }
    }

    #[test]
    fn forward_fill_returns_last_closed_at_or_before() {
        let bars: Vec<Bar> = (0..5).map(|i| mk_bar(i * 60_000, 100.0 + i as f64)).collect();
        let store = build_role_store(Timeframe::M1, bars, &[]);
        assert_eq!(store.last_closed_at_or_before(180_000), Some(2));
        assert_eq!(store.last_closed_at_or_before(181_000), Some(2));
        assert_eq!(store.last_closed_at_or_before(-1), None);
    }

    #[test]
    fn feature_columns_carry_nan_until_ready() {
        let bars: Vec<Bar> = (0..5).map(|i| mk_bar(i * 60_000, 100.0 + i as f64)).collect();
        let spec = FeatureSpec {
            id: "ema3".into(),
            kind: IndicatorKind::Ema,
            params: IndicatorParams { length: 3, ..Default::default() },
            input: InputSource::Close,
        };
        let store = build_role_store(Timeframe::M1, bars, &[spec]);
        let col = &store.feature_columns["ema3"];
        assert_eq!(col.len(), 5);
    }
}
