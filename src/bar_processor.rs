//! Bar Processor (§4.J): the deterministic per-exec-bar simulation loop.
//! Steps the 1-minute exchange sub-loop, advances every declared structure
//! detector in topological order, builds the runtime `Snapshot`, evaluates
//! compiled actions against it, and turns entry intents into risk-sized
//! orders. Produces a `RunReport` the metrics/artifacts layer consumes.

use std::collections::HashMap;

use tracing::{debug, instrument, warn};

use crate::dsl::evaluator::{evaluate, HistoryProvider, SetupCache};
use crate::domain::TradeSide;
use crate::error::EngineResult;
use crate::exchange::types::{Order, OrderStatus, OrderType, TimeInForce, Trade};
use crate::exchange::{ExitMode, SimulatedExchange};
use crate::feed::{FeedStore, TimeframeRole};
use crate::indicator::IndicatorKind;
use crate::play::{CompiledPlay, PositionPolicy, StructureNode};
use crate::risk::RiskPolicy;
use crate::snapshot::Snapshot;
use crate::structure::swing::SwingOutput;
use crate::structure::trend::TrendOutput;
use crate::structure::StructureOutput;

#[derive(Debug, Clone)]
pub struct EquityPoint {
    pub ts: i64,
    pub equity: f64,
}

/// One completed run, as handed to the metrics/artifacts layer. `events`
/// holds pre-serialized JSONL lines (§4.K) rather than a typed union —
/// fills/funding/liquidations/trades/rejections each already know how to
/// render themselves when they occur.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub events: Vec<String>,
    pub starting_equity: f64,
    pub final_equity: f64,
    pub sim_start_idx: usize,
    pub sim_end_idx: usize,
    /// Sum of every funding payment charged across the run (§4.H), signed
    /// the same way `FundingEvent::payment` is — positive means the account
    /// paid. Kept separate from `Trade` since funding settles against the
    /// account regardless of which trade (if any) is open at the time.
    pub total_funding_paid: f64,
    /// `(equity - mmr) / equity * 100` at each exec-bar close, `None` where
    /// no position was open (§4.K margin stress).
    pub mmr_distance_pct: Vec<Option<f64>>,
}

type StructureMap = HashMap<(TimeframeRole, String), StructureOutput>;

fn swing_of(outputs: &HashMap<String, StructureOutput>, id: &str) -> SwingOutput {
    match outputs.get(id) {
        Some(StructureOutput::Swing(o)) => *o,
        _ => SwingOutput::default(),
    }
}

fn trend_of(outputs: &HashMap<String, StructureOutput>, id: &str) -> TrendOutput {
    match outputs.get(id) {
        Some(StructureOutput::Trend(o)) => *o,
        _ => TrendOutput::default(),
    }
}

/// Steps every structure declared for one role at `role_idx`, writing
/// results both into a by-id scratch map (for `uses` lookups within this
/// role) and into the shared namespaced `StructureMap` the snapshot reads.
fn step_role_structures(
    nodes: &mut [StructureNode],
    role: TimeframeRole,
    role_idx: usize,
    store: &crate::feed::RoleStore,
    into: &mut StructureMap,
) {
    let Some(bar) = store.bar_at(role_idx) else { return };
    let mut by_id: HashMap<String, StructureOutput> = HashMap::new();

    for node in nodes.iter_mut() {
        let output = match node {
            StructureNode::Swing { detector, atr_feature, .. } => {
                let atr = atr_feature.as_ref().and_then(|k| store.feature_value(k, role_idx));
                StructureOutput::Swing(detector.push(&bar, atr))
            }
            StructureNode::Trend { detector, uses, .. } => {
                let swing = swing_of(&by_id, uses);
                StructureOutput::Trend(detector.push(&swing))
            }
            StructureNode::MarketStructure { detector, uses, .. } => {
                let swing = swing_of(&by_id, uses);
                StructureOutput::MarketStructure(detector.push(&bar, &swing))
            }
            StructureNode::Fibonacci { detector, uses, trend_uses, .. } => {
                let swing = swing_of(&by_id, uses);
                let trend = trend_uses.as_ref().map(|t| trend_of(&by_id, t));
                StructureOutput::Fibonacci(detector.push(&swing, trend.as_ref()))
            }
            StructureNode::Zone { detector, uses, atr_feature, .. } => {
                let swing = swing_of(&by_id, uses);
                let atr = atr_feature.as_ref().and_then(|k| store.feature_value(k, role_idx));
                StructureOutput::Zone(detector.push(&bar, &swing, atr))
            }
            StructureNode::DerivedZone { detector, uses, .. } => {
                let swing = swing_of(&by_id, uses);
                StructureOutput::DerivedZone(detector.push(&bar, &swing))
            }
            StructureNode::RollingWindow { detector, source, .. } => {
                StructureOutput::RollingWindow(detector.push(source.extract(&bar)))
            }
        };
        by_id.insert(node.id().to_string(), output.clone());
        into.insert((role, node.id().to_string()), output);
    }
}

/// Read-only view over everything computed so far, used by the evaluator's
/// `HistoryProvider` to resolve `cross_*`/`holds_for`/`occurred_within`
/// references against earlier exec bars (§4.G).
struct HistoryView<'a> {
    feed: &'a FeedStore,
    structure_history: &'a [StructureMap],
    current_exec_idx: usize,
}

impl<'a> HistoryProvider for HistoryView<'a> {
    fn snapshot_at(&self, bars_back: u32) -> Option<Snapshot<'_>> {
        let idx = self.current_exec_idx.checked_sub(bars_back as usize)?;
        if idx >= self.structure_history.len() {
            return None;
        }
        let price = *self.feed.exec.close.get(idx)?;
        Some(Snapshot {
            feed: self.feed,
            exec_idx: idx,
            med_idx: self.feed.htf_idx_for_exec(TimeframeRole::Med, idx),
            high_idx: self.feed.htf_idx_for_exec(TimeframeRole::High, idx),
            mark_price: price,
            last_price: price,
            structures: &self.structure_history[idx],
        })
    }
}

/// First exec-role feature whose kind is `atr`, read at `exec_idx` — the
/// convention risk sizing (§4.M) relies on for ATR-multiple stops/targets.
fn atr_feature_value(play: &CompiledPlay, feed: &FeedStore, exec_idx: usize) -> Option<f64> {
    let features = play.features.get(&TimeframeRole::Exec)?;
    let atr = features.iter().find(|f| f.kind == IndicatorKind::Atr)?;
    feed.exec.feature_value(&atr.id, exec_idx)
}

/// Applies break-even (once per position, via `break_even_triggered`) and
/// trailing-stop updates for the open position, called every 1-minute step
/// right after exchange settlement and before the strategy evaluates (§4.M).
fn update_stop_management(exchange: &mut SimulatedExchange, risk: &RiskPolicy, mark: f64, atr: Option<f64>) {
    let Some(pos) = exchange.position.as_ref() else { return };
    let side = pos.side;
    let entry_price = pos.entry_price;
    let current_sl = pos.sl_price;
    let already_at_break_even = pos.break_even_triggered;
    let profit_pct = side.sign() * (mark - entry_price) / entry_price * 100.0;

    let mut new_sl = current_sl;

    if !already_at_break_even {
        if let Some(be_price) = risk.break_even_stop(side, entry_price, profit_pct) {
            new_sl = Some(match (side, new_sl) {
                (TradeSide::Long, Some(existing)) => be_price.max(existing),
                (TradeSide::Short, Some(existing)) => be_price.min(existing),
                (_, None) => be_price,
            });
            exchange.position.as_mut().unwrap().break_even_triggered = true;
        }
    }

    if let Some(trail_price) = risk.trailing_stop_update(side, mark, profit_pct, atr, new_sl) {
        new_sl = Some(trail_price);
    }

    if new_sl != current_sl {
        if let Some(sl) = new_sl {
            exchange.set_stop_loss(sl);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn market_order(side: TradeSide, qty: f64, leverage: f64, ts: i64, reduce_only: bool, pending_sl: Option<f64>, pending_tp: Option<f64>) -> Order {
    Order {
        id: 0,
        side,
        order_type: OrderType::Market,
        qty,
        leverage,
        limit_price: None,
        trigger_price: None,
        tif: TimeInForce::Gtc,
        expire_after_bars: 0,
        bars_waited: 0,
        reduce_only,
        status: OrderStatus::Pending,
        submitted_ts: ts,
        triggered: false,
        pending_sl,
        pending_tp,
    }
}

fn action_allowed(kind: &str, policy: PositionPolicy) -> bool {
    match (kind, policy) {
        ("enter_long", PositionPolicy::ShortOnly) => false,
        ("enter_short", PositionPolicy::LongOnly) => false,
        _ => true,
    }
}

/// Runs the full deterministic simulation for `play` over `feed`, starting
/// at `sim_start_idx` (post-warmup, per §4.L) through the end of the feed.
#[instrument(skip(play, feed), fields(play = %play.name, symbol = %play.symbol))]
pub fn run_bar_processor(mut play: CompiledPlay, feed: FeedStore, sim_start_idx: usize) -> EngineResult<RunReport> {
    let mut exchange = SimulatedExchange::new(play.exchange_cfg, play.account.starting_equity);
    let mut cache = SetupCache::new();
    let mut events: Vec<String> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::new();
    let mut trades: Vec<Trade> = Vec::new();
    let mut structure_history: Vec<StructureMap> = Vec::with_capacity(feed.exec.len());
    let mut total_funding_paid = 0.0f64;
    let mut mmr_distance_pct: Vec<Option<f64>> = Vec::with_capacity(feed.exec.len());

    let n_exec = feed.exec.len();
    let mut last_med_idx: Option<usize> = None;
    let mut last_high_idx: Option<usize> = None;
    let mut peak_equity = play.account.starting_equity;

    for exec_idx in 0..n_exec {
        let mut current_structures: StructureMap = HashMap::new();

        if let Some(nodes) = play.structures.get_mut(&TimeframeRole::Exec) {
            step_role_structures(nodes, TimeframeRole::Exec, exec_idx, &feed.exec, &mut current_structures);
        }
        if let Some(med_store) = feed.med.as_ref() {
            let med_idx = feed.htf_idx_for_exec(TimeframeRole::Med, exec_idx);
            if med_idx.is_some() && med_idx != last_med_idx {
                if let Some(nodes) = play.structures.get_mut(&TimeframeRole::Med) {
                    step_role_structures(nodes, TimeframeRole::Med, med_idx.unwrap(), med_store, &mut current_structures);
                }
                last_med_idx = med_idx;
            }
        }
        if let Some(high_store) = feed.high.as_ref() {
            let high_idx = feed.htf_idx_for_exec(TimeframeRole::High, exec_idx);
            if high_idx.is_some() && high_idx != last_high_idx {
                if let Some(nodes) = play.structures.get_mut(&TimeframeRole::High) {
                    step_role_structures(nodes, TimeframeRole::High, high_idx.unwrap(), high_store, &mut current_structures);
                }
                last_high_idx = high_idx;
            }
        }

        structure_history.push(current_structures);

        let atr = atr_feature_value(&play, &feed, exec_idx);
        let minute_range = feed.minute_range_for_exec(exec_idx);
        for minute_idx in minute_range {
            let Some(minute_bar) = feed.quote_1m.bar_at(minute_idx) else { continue };
            let step = exchange.process_1m_bar(&minute_bar);

            for fill in &step.fills {
                events.push(format!(
                    "{{\"type\":\"fill\",\"ts\":{},\"side\":\"{}\",\"price\":{},\"qty\":{},\"fee\":{},\"is_entry\":{}}}",
                    fill.ts, fill.side, fill.price, fill.qty, fill.fee, fill.is_entry
                ));
            }
            for fe in &step.funding_events {
                events.push(format!("{{\"type\":\"funding\",\"ts\":{},\"rate\":{},\"payment\":{}}}", fe.ts, fe.rate, fe.payment));
                total_funding_paid += fe.payment;
            }
            for liq in &step.liquidations {
                events.push(format!("{{\"type\":\"liquidation\",\"ts\":{},\"liq_price\":{},\"fee\":{}}}", liq.ts, liq.liq_price, liq.fee));
            }
            for trade in &step.closed_trades {
                events.push(format!(
                    "{{\"type\":\"trade_closed\",\"ts\":{},\"side\":\"{}\",\"pnl\":{}}}",
                    trade.exit_ts, trade.side, trade.realized_pnl
                ));
            }
            trades.extend(step.closed_trades.iter().cloned());
            if step.equity_floor_hit {
                warn!(ts = minute_bar.ts_close, "equity floor breached, halting run");
                let final_equity = exchange.equity();
                mmr_distance_pct.push(exchange.distance_to_mmr_pct());
                return Ok(finish_report(
                    play,
                    equity_curve,
                    trades,
                    sim_start_idx,
                    exec_idx,
                    final_equity,
                    events,
                    total_funding_paid,
                    mmr_distance_pct,
                ));
            }

            update_stop_management(&mut exchange, &play.risk, minute_bar.close.0, atr);

            let equity = exchange.equity();
            peak_equity = peak_equity.max(equity);

            // §4.J step 2: Snapshot + action evaluation happen per 1-minute
            // bar, using that bar's own price as mark/last — not once per
            // exec bar after settlement has already advanced past it.
            if exec_idx >= sim_start_idx {
                let drawdown_pct = if peak_equity > 0.0 { (peak_equity - equity) / peak_equity * 100.0 } else { 0.0 };
                let history = HistoryView { feed: &feed, structure_history: &structure_history, current_exec_idx: exec_idx };
                let snap = Snapshot {
                    feed: &feed,
                    exec_idx,
                    med_idx: feed.htf_idx_for_exec(TimeframeRole::Med, exec_idx),
                    high_idx: feed.htf_idx_for_exec(TimeframeRole::High, exec_idx),
                    mark_price: minute_bar.close.0,
                    last_price: minute_bar.close.0,
                    structures: &structure_history[exec_idx],
                };
                cache.clear();
                evaluate_actions(&mut play, &mut exchange, &feed, &snap, &history, &mut cache, exec_idx, minute_bar.ts_close, drawdown_pct, &mut events);
            }
        }

        let last_minute_ts = feed.exec.ts_close[exec_idx];
        mmr_distance_pct.push(exchange.distance_to_mmr_pct());
        equity_curve.push(EquityPoint { ts: last_minute_ts, equity: exchange.equity() });
    }

    let final_equity = exchange.equity();
    Ok(finish_report(
        play,
        equity_curve,
        trades,
        sim_start_idx,
        n_exec.saturating_sub(1),
        final_equity,
        events,
        total_funding_paid,
        mmr_distance_pct,
    ))
}

#[allow(clippy::too_many_arguments)]
fn finish_report(
    play: CompiledPlay,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<Trade>,
    sim_start_idx: usize,
    sim_end_idx: usize,
    final_equity: f64,
    events: Vec<String>,
    total_funding_paid: f64,
    mmr_distance_pct: Vec<Option<f64>>,
) -> RunReport {
    RunReport {
        trades,
        equity_curve,
        events,
        starting_equity: play.account.starting_equity,
        final_equity,
        sim_start_idx,
        sim_end_idx,
        total_funding_paid,
        mmr_distance_pct,
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate_actions(
    play: &mut CompiledPlay,
    exchange: &mut SimulatedExchange,
    feed: &FeedStore,
    snap: &Snapshot,
    history: &HistoryView,
    cache: &mut SetupCache,
    exec_idx: usize,
    ts: i64,
    drawdown_pct: f64,
    events: &mut Vec<String>,
) {
    let atr = atr_feature_value(play, feed, exec_idx);

    // Exits before entries (§4.J step 2d) — the action list is already
    // ordered this way by the Play loader.
    let actions = std::mem::take(&mut play.actions);
    for action in &actions {
        if !action_allowed(&action.kind, play.position_policy) {
            continue;
        }
        let (result, _reason) = evaluate(&action.expr, snap, history, &play.setups, cache, exec_idx as u64);
        if result != Some(true) {
            continue;
        }

        match action.kind.as_str() {
            "exit_long" | "exit_short" => {
                if exchange.cfg.exit_mode == ExitMode::SlTpOnly {
                    continue;
                }
                if exchange.position.is_some() {
                    let side = exchange.position.as_ref().unwrap().side;
                    let wants_long_exit = action.kind == "exit_long" && side == TradeSide::Long;
                    let wants_short_exit = action.kind == "exit_short" && side == TradeSide::Short;
                    if wants_long_exit || wants_short_exit {
                        let qty = exchange.position.as_ref().unwrap().qty;
                        let order = market_order(side.opposite(), qty, 1.0, ts, true, None, None);
                        let _ = exchange.submit_order(order, None);
                    }
                }
            }
            "enter_long" | "enter_short" => {
                if exchange.position.is_some() {
                    continue;
                }
                let side = if action.kind == "enter_long" { TradeSide::Long } else { TradeSide::Short };
                let equity = exchange.equity();
                match play.risk.plan_entry(side, equity, drawdown_pct, exchange.last_price, atr, None) {
                    Ok(plan) => {
                        let order = market_order(side, plan.qty, play.risk.leverage, ts, false, plan.sl_price, plan.tp_price);
                        if let Err(e) = exchange.submit_order(order, Some(play.risk.leverage)) {
                            debug!(%e, "entry order rejected");
                            events.push(format!("{{\"type\":\"entry_rejected\",\"ts\":{ts},\"reason\":\"{e}\"}}"));
                        }
                    }
                    Err(e) => {
                        events.push(format!("{{\"type\":\"entry_rejected\",\"ts\":{ts},\"reason\":\"{e}\"}}"));
                    }
                }
            }
            _ => {}
        }
    }
    play.actions = actions;
}
