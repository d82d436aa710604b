//! DSL evaluator (§4.G): a pure function from `(CompiledExpr, Snapshot,
//! History, SetupCache)` to `Option<bool>` plus a `ReasonCode` for debug
//! artifacts. Three-valued logic throughout — MISSING never panics, never
//! errors, and always participates in `all`/`any` as a definite non-true.

use std::collections::{HashMap, HashSet};

use super::ast::{ArithOp, CompiledExpr, CondOp, CrossOp, Operand, ReasonCode, WindowAnchor, WindowExpr};
use crate::feed::TimeframeRole;
use crate::snapshot::Snapshot;

/// Supplies historical snapshots for window/cross evaluation. `bars_back`
/// counts exec bars; `0` is the current bar (equivalent to the caller's
/// live `Snapshot`).
pub trait HistoryProvider {
    fn snapshot_at(&self, bars_back: u32) -> Option<Snapshot<'_>>;
}

/// Setup memoization (§4.G): a setup expression is evaluated at most once
/// per 1m step, cached by `(setup_name, bar_idx)`; a `visiting` set guards
/// against circular setup references, which resolve to `INTERNAL_ERROR`.
#[derive(Default)]
pub struct SetupCache {
    memo: HashMap<(String, u64), (Option<bool>, ReasonCode)>,
    visiting: HashSet<String>,
}

impl SetupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.memo.clear();
        self.visiting.clear();
    }
}

const MAX_WINDOW_BARS: u32 = 500;

fn eval_operand(op: &Operand, snap: &Snapshot) -> Option<f64> {
    match op {
        Operand::Literal(v) => Some(*v),
        Operand::Ref(r) => snap.resolve(r),
        Operand::Arith(lhs, arith_op, rhs) => {
            let l = eval_operand(lhs, snap)?;
            let r = eval_operand(rhs, snap)?;
            match arith_op {
                ArithOp::Add => Some(l + r),
                ArithOp::Sub => Some(l - r),
                ArithOp::Mul => Some(l * r),
                ArithOp::Div => {
                    if r == 0.0 {
                        None
                    } else {
                        Some(l / r)
                    }
                }
                ArithOp::Rem => {
                    if r == 0.0 {
                        None
                    } else {
                        Some(l % r)
                    }
                }
            }
        }
    }
}

fn eval_cond(lhs: &Operand, op: &CondOp, rhs: &Operand, snap: &Snapshot) -> (Option<bool>, ReasonCode) {
    let Some(l) = eval_operand(lhs, snap) else {
        return (Some(false), ReasonCode::Missing);
    };
    let Some(r) = eval_operand(rhs, snap) else {
        return (Some(false), ReasonCode::Missing);
    };
    match op {
        CondOp::Gt => (Some(l > r), ReasonCode::Ok),
        CondOp::Lt => (Some(l < r), ReasonCode::Ok),
        CondOp::Ge => (Some(l >= r), ReasonCode::Ok),
        CondOp::Le => (Some(l <= r), ReasonCode::Ok),
        CondOp::Between { hi } => {
            let Some(hi_v) = eval_operand(hi, snap) else {
                return (Some(false), ReasonCode::Missing);
            };
            (Some(l >= r && l <= hi_v), ReasonCode::Threshold)
        }
        CondOp::NearPct { tolerance } => {
            let tol_ratio = tolerance / 100.0;
            (Some((l - r).abs() <= tol_ratio * r.abs()), ReasonCode::Threshold)
        }
        CondOp::NearAbs { tolerance } => (Some((l - r).abs() <= *tolerance), ReasonCode::Threshold),
        CondOp::Eq => (Some(l == r), ReasonCode::Ok),
        CondOp::Ne => (Some(l != r), ReasonCode::Ok),
        CondOp::In(values) => (Some(values.iter().any(|v| *v == l)), ReasonCode::Ok),
    }
}

fn eval_cross<H: HistoryProvider>(
    lhs: &Operand,
    op: &CrossOp,
    rhs: &Operand,
    snap: &Snapshot,
    history: &H,
) -> (Option<bool>, ReasonCode) {
    let Some(prev_snap) = history.snapshot_at(1) else {
        return (Some(false), ReasonCode::Missing);
    };
    let (Some(curr_l), Some(curr_r), Some(prev_l), Some(prev_r)) = (
        eval_operand(lhs, snap),
        eval_operand(rhs, snap),
        eval_operand(lhs, &prev_snap),
        eval_operand(rhs, &prev_snap),
    ) else {
        return (Some(false), ReasonCode::Missing);
    };
    let crossed = match op {
        CrossOp::Above => prev_l <= prev_r && curr_l > curr_r,
        CrossOp::Below => prev_l >= prev_r && curr_l < curr_r,
    };
    (Some(crossed), ReasonCode::Cross)
}

fn effective_lookback(snap: &Snapshot, anchor: &WindowAnchor, bars: u32) -> u32 {
    let Some(anchor_role) = anchor.anchor_tf else {
        return bars.min(MAX_WINDOW_BARS);
    };
    let exec_min = snap.tf_minutes(TimeframeRole::Exec).unwrap_or(1).max(1);
    let anchor_min = snap.tf_minutes(anchor_role).unwrap_or(exec_min).max(1);
    let scaled = (bars as u64 * anchor_min as u64) / exec_min as u64;
    (scaled as u32).min(MAX_WINDOW_BARS)
}

fn eval_window<H: HistoryProvider>(
    w: &WindowExpr,
    snap: &Snapshot,
    history: &H,
    setups: &HashMap<String, CompiledExpr>,
    cache: &mut SetupCache,
    bar_idx: u64,
) -> (Option<bool>, ReasonCode) {
    let eval_at = |bars_back: u32, inner: &CompiledExpr, cache: &mut SetupCache| -> Option<bool> {
        if bars_back == 0 {
            return evaluate(inner, snap, history, setups, cache, bar_idx).0;
        }
        let past = history.snapshot_at(bars_back)?;
        evaluate(inner, &past, history, setups, cache, bar_idx.saturating_sub(bars_back as u64)).0
    };

    match w {
        WindowExpr::HoldsFor { bars, anchor, expr } => {
            let n = effective_lookback(snap, anchor, *bars);
            for k in 0..n {
                match eval_at(k, expr, cache) {
                    Some(true) => continue,
                    _ => return (Some(false), ReasonCode::Window),
                }
            }
            (Some(true), ReasonCode::Window)
        }
        WindowExpr::OccurredWithin { bars, anchor, expr } => {
            let n = effective_lookback(snap, anchor, *bars);
            for k in 0..n {
                if eval_at(k, expr, cache) == Some(true) {
                    return (Some(true), ReasonCode::Window);
                }
            }
            (Some(false), ReasonCode::Window)
        }
        WindowExpr::CountTrue { bars, min_true, anchor, expr } => {
            let n = effective_lookback(snap, anchor, *bars);
            let count = (0..n).filter(|&k| eval_at(k, expr, cache) == Some(true)).count() as u32;
            (Some(count >= *min_true), ReasonCode::Window)
        }
    }
}

fn eval_setup<H: HistoryProvider>(
    name: &str,
    snap: &Snapshot,
    history: &H,
    setups: &HashMap<String, CompiledExpr>,
    cache: &mut SetupCache,
    bar_idx: u64,
) -> (Option<bool>, ReasonCode) {
    let key = (name.to_string(), bar_idx);
    if let Some(cached) = cache.memo.get(&key) {
        return *cached;
    }
    if cache.visiting.contains(name) {
        return (None, ReasonCode::InternalError);
    }
    let Some(setup_expr) = setups.get(name) else {
        return (None, ReasonCode::InternalError);
    };
    cache.visiting.insert(name.to_string());
    let result = evaluate(setup_expr, snap, history, setups, cache, bar_idx);
    cache.visiting.remove(name);
    cache.memo.insert(key, result);
    result
}

/// Evaluates a compiled expression against `snap`, short-circuiting `all`
/// at the first false and `any` at the first true.
pub fn evaluate<H: HistoryProvider>(
    expr: &CompiledExpr,
    snap: &Snapshot,
    history: &H,
    setups: &HashMap<String, CompiledExpr>,
    cache: &mut SetupCache,
    bar_idx: u64,
) -> (Option<bool>, ReasonCode) {
    match expr {
        CompiledExpr::All(children) => {
            let mut reason = ReasonCode::Ok;
            for child in children {
                let (v, r) = evaluate(child, snap, history, setups, cache, bar_idx);
                if v != Some(true) {
                    return (Some(false), if v.is_none() { ReasonCode::Missing } else { r });
                }
                reason = r;
            }
            (Some(true), reason)
        }
        CompiledExpr::Any(children) => {
            let mut all_missing = true;
            for child in children {
                let (v, r) = evaluate(child, snap, history, setups, cache, bar_idx);
                if v == Some(true) {
                    return (Some(true), r);
                }
                if v.is_some() {
                    all_missing = false;
                }
            }
            (Some(false), if all_missing { ReasonCode::Missing } else { ReasonCode::Ok })
        }
        CompiledExpr::Not(inner) => {
            let (v, r) = evaluate(inner, snap, history, setups, cache, bar_idx);
            match v {
                Some(b) => (Some(!b), r),
                None => (None, r),
            }
        }
        CompiledExpr::Cond { lhs, op, rhs } => eval_cond(lhs, op, rhs, snap),
        CompiledExpr::Cross { lhs, op, rhs } => eval_cross(lhs, op, rhs, snap, history),
        CompiledExpr::Window(w) => eval_window(w, snap, history, setups, cache, bar_idx),
        CompiledExpr::SetupRef(name) => eval_setup(name, snap, history, setups, cache, bar_idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::domain::{Price, Volume};
    use crate::feed::{build_role_store, FeedStore, RoleStore};
    use crate::snapshot::{OhlcvField, Ref};
    use crate::time::Timeframe;

    struct NoHistory;
    impl HistoryProvider for NoHistory {
        fn snapshot_at(&self, _bars_back: u32) -> Option<Snapshot<'_>> {
            None
        }
    }

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
        let exec = build_role_store(Timeframe::M1, bars, &[]);
        FeedStore { exec, med: None, high: None, quote_1m: RoleStore::default() }
    }

    #[test]
    fn all_short_circuits_on_first_false() {
        let feed = mk_feed();
        let structures = HashMap::new();
        let snap = Snapshot { feed: &feed, exec_idx: 4, med_idx: None, high_idx: None, mark_price: 104.0, last_price: 104.0, structures: &structures };
        let expr = CompiledExpr::All(vec![
            CompiledExpr::Cond {
                lhs: Operand::Ref(Ref::Ohlcv(OhlcvField::Close, TimeframeRole::Exec, 0)),
                op: CondOp::Gt,
                rhs: Operand::Literal(1000.0),
            },
            CompiledExpr::Cond { lhs: Operand::Literal(1.0), op: CondOp::Eq, rhs: Operand::Literal(1.0) },
        ]);
        let setups = HashMap::new();
        let mut cache = SetupCache::new();
        let (v, _) = evaluate(&expr, &snap, &NoHistory, &setups, &mut cache, 4);
        assert_eq!(v, Some(false));
    }

    #[test]
    fn division_by_zero_is_missing() {
        let feed = mk_feed();
        let structures = HashMap::new();
        let snap = Snapshot { feed: &feed, exec_idx: 0, med_idx: None, high_idx: None, mark_price: 100.0, last_price: 100.0, structures: &structures };
        let op = Operand::Arith(Box::new(Operand::Literal(1.0)), ArithOp::Div, Box::new(Operand::Literal(0.0)));
        assert_eq!(eval_operand(&op, &snap), None);
    }

    #[test]
    fn setup_cycle_returns_internal_error() {
        let feed = mk_feed();
        let structures = HashMap::new();
        let snap = Snapshot { feed: &feed, exec_idx: 0, med_idx: None, high_idx: None, mark_price: 100.0, last_price: 100.0, structures: &structures };
        let mut setups = HashMap::new();
        setups.insert("a".to_string(), CompiledExpr::SetupRef("b".to_string()));
        setups.insert("b".to_string(), CompiledExpr::SetupRef("a".to_string()));
        let mut cache = SetupCache::new();
        let (v, r) = eval_setup("a", &snap, &NoHistory, &setups, &mut cache, 0);
        assert_eq!(v, None);
        assert_eq!(r, ReasonCode::InternalError);
    }
}
