//! Simulated exchange (§4.H): isolated-USDT margin, one-way positions,
//! market/limit/stop order matching against a 1-minute price path, funding
//! settlement, and Bybit-style liquidation.

pub mod types;

use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::domain::TradeSide;
use crate::error::{EngineResult, SimError};
use crate::time::is_funding_settlement;
use types::{ExitReason, Fill, FundingEvent, LiquidationEvent, Order, OrderStatus, OrderType, Position, StepResult, TimeInForce, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitMode {
    SlTpOnly,
    Signal,
    FirstHit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub maintenance_margin_rate: f64,
    pub taker_bps: f64,
    pub maker_bps: f64,
    pub slippage_bps: f64,
    pub default_funding_rate_bps: f64,
    pub liquidation_fee_bps: f64,
    pub exit_mode: ExitMode,
    pub equity_floor: Option<f64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: 0.005,
            taker_bps: 5.5,
            maker_bps: 2.0,
            slippage_bps: 1.0,
            default_funding_rate_bps: 1.0,
            liquidation_fee_bps: 10.0,
            exit_mode: ExitMode::FirstHit,
            equity_floor: None,
        }
    }
}

fn liquidation_price(side: TradeSide, entry_price: f64, leverage: f64, mmr: f64) -> f64 {
    match side {
        TradeSide::Long => entry_price * (1.0 - 1.0 / leverage + mmr),
        TradeSide::Short => entry_price * (1.0 + 1.0 / leverage - mmr),
    }
}

pub struct SimulatedExchange {
    pub cfg: ExchangeConfig,
    pub cash_balance: f64,
    pub starting_equity: f64,
    pub position: Option<Position>,
    pub pending_orders: Vec<Order>,
    pub mark_price: f64,
    pub last_price: f64,
    next_order_id: u64,
    next_trade_id: u64,
}

impl SimulatedExchange {
    pub fn new(cfg: ExchangeConfig, starting_equity: f64) -> Self {
        Self {
            cfg,
            cash_balance: starting_equity,
            starting_equity,
            position: None,
            pending_orders: Vec::new(),
            mark_price: 0.0,
            last_price: 0.0,
            next_order_id: 0,
            next_trade_id: 0,
        }
    }

    pub fn equity(&self) -> f64 {
        let unrealized = self.position.as_ref().map(|p| p.unrealized_pnl(self.mark_price)).unwrap_or(0.0);
        self.cash_balance + unrealized
    }

    /// §4.H invariant 2: `|position_notional| <= leverage * (cash + unrealized)`.
    pub fn notional_within_leverage_cap(&self, additional_notional: f64, leverage: f64) -> bool {
        let existing = self.position.as_ref().map(|p| p.notional(self.mark_price)).unwrap_or(0.0);
        existing + additional_notional <= leverage * self.equity() + f64::EPSILON
    }

    pub fn submit_order(&mut self, mut order: Order, leverage_for_entry: Option<f64>) -> EngineResult<u64> {
        if order.tif == TimeInForce::PostOnly {
            if let Some(limit) = order.limit_price {
                let would_cross = match order.side {
                    TradeSide::Long => limit >= self.last_price,
                    TradeSide::Short => limit <= self.last_price,
                };
                if would_cross {
                    return Err(SimError::OrderRejected { id: order.id, reason: "post_only order would cross the market".into() }.into());
                }
            }
        }
        if let Some(lev) = leverage_for_entry {
            if !self.notional_within_leverage_cap(order.qty * self.last_price, lev) {
                return Err(SimError::RiskRejected { exec_idx: 0, reason: "entry exceeds leverage cap".into() }.into());
            }
            order.leverage = lev;
        }
        order.id = self.next_order_id;
        self.next_order_id += 1;
        let id = order.id;
        self.pending_orders.push(order);
        Ok(id)
    }

    fn taker_fee(&self, notional: f64) -> f64 {
        notional * self.cfg.taker_bps / 10_000.0
    }

    fn maker_fee(&self, notional: f64) -> f64 {
        notional * self.cfg.maker_bps / 10_000.0
    }

    fn apply_slippage(&self, side: TradeSide, price: f64) -> f64 {
        let bps = self.cfg.slippage_bps / 10_000.0;
        match side {
            TradeSide::Long => price * (1.0 + bps),
            TradeSide::Short => price * (1.0 - bps),
        }
    }

    /// Opens (or adds to, not supported — one-way single position) a position
    /// from a filled entry order.
    fn open_position(&mut self, order: &Order, fill_price: f64, fill_ts: i64, leverage: f64, entry_slippage_bps: f64) -> Fill {
        let notional = order.qty * fill_price;
        let fee = if order.order_type == OrderType::Limit { self.maker_fee(notional) } else { self.taker_fee(notional) };
        self.cash_balance -= fee;
        let margin = notional / leverage;
        let liq = liquidation_price(order.side, fill_price, leverage, self.cfg.maintenance_margin_rate);
        self.position = Some(Position {
            side: order.side,
            qty: order.qty,
            entry_price: fill_price,
            entry_notional: notional,
            entry_fee: fee,
            leverage,
            isolated_margin: margin,
            liq_price: liq,
            opened_ts: fill_ts,
            sl_price: order.pending_sl,
            tp_price: order.pending_tp,
            break_even_triggered: false,
            mae: 0.0,
            mfe: 0.0,
            entry_slippage_bps,
            funding_accrued: 0.0,
        });
        Fill { order_id: order.id, ts: fill_ts, side: order.side, price: fill_price, qty: order.qty, fee, is_entry: true }
    }

    /// Closes the current position (fully) against `exit_price`, pro-rating
    /// entry fee is unnecessary here since partial closes are not modeled
    /// for exec-level SL/TP/liquidation exits (always full close).
    fn close_position(&mut self, exit_price: f64, exit_ts: i64, reason: ExitReason, is_taker: bool) -> Option<Trade> {
        let notional = self.position.as_ref()?.qty * exit_price;
        let fee = if is_taker { self.taker_fee(notional) } else { self.maker_fee(notional) };
        self.close_position_with_fee(exit_price, exit_ts, reason, fee)
    }

    /// Closes the position charging exactly `fee` (rather than deriving it
    /// from taker/maker rates) — used for liquidation, where the exchange's
    /// own liquidation fee replaces the normal exit fee rather than stacking
    /// with it.
    fn close_position_with_fee(&mut self, exit_price: f64, exit_ts: i64, reason: ExitReason, fee: f64) -> Option<Trade> {
        let pos = self.position.take()?;
        let realized = pos.unrealized_pnl(exit_price) - fee - pos.entry_fee;
        self.cash_balance += pos.unrealized_pnl(exit_price) - fee;
        self.next_trade_id += 1;
        Some(Trade {
            id: self.next_trade_id,
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price,
            qty: pos.qty,
            entry_ts: pos.opened_ts,
            exit_ts,
            entry_fee: pos.entry_fee,
            exit_fee: fee,
            funding_paid: pos.funding_accrued,
            realized_pnl: realized,
            exit_reason: reason,
            mae: pos.mae,
            mfe: pos.mfe,
            leverage: pos.leverage,
            entry_slippage_bps: pos.entry_slippage_bps,
        })
    }

    fn maintenance_margin_requirement(&self, pos: &Position) -> f64 {
        pos.qty * self.mark_price * self.cfg.maintenance_margin_rate
    }

    /// `(equity - mmr) / equity * 100`, or `None` with no open position
    /// (§4.K margin stress: "equity within 2x MMR" ⟺ this `<= 50.0`).
    pub fn distance_to_mmr_pct(&self) -> Option<f64> {
        let pos = self.position.as_ref()?;
        let mmr = self.maintenance_margin_requirement(pos);
        let equity = self.equity();
        if equity == 0.0 {
            return Some(0.0);
        }
        Some((equity - mmr) / equity * 100.0)
    }

    fn try_fill_pending(&mut self, bar: &Bar, step: &mut StepResult) {
        let mut still_pending = Vec::with_capacity(self.pending_orders.len());
        let orders = std::mem::take(&mut self.pending_orders);
        for mut order in orders {
            if order.status != OrderStatus::Pending {
                continue;
            }

            if matches!(order.order_type, OrderType::StopMarket | OrderType::StopLimit) && !order.triggered {
                if let Some(trigger) = order.trigger_price {
                    let crossed = match order.side {
                        TradeSide::Long => bar.high.0 >= trigger,
                        TradeSide::Short => bar.low.0 <= trigger,
                    };
                    if crossed {
                        order.triggered = true;
                    } else {
                        still_pending.push(order);
                        continue;
                    }
                }
            }

            let effective_type = match order.order_type {
                OrderType::StopMarket => OrderType::Market,
                OrderType::StopLimit => OrderType::Limit,
                other => other,
            };

            // A `Market` order is always seen by `try_fill_pending` for the
            // first time on the 1m bar after submission, so it fills
            // unconditionally at that bar's open (§4.H: "next 1m open after
            // submission").
            let (filled, entry_slippage_bps) = match effective_type {
                OrderType::Market => {
                    let fill_price = self.apply_slippage(order.side, bar.open.0);
                    (Some(fill_price), self.cfg.slippage_bps)
                }
                OrderType::Limit => {
                    let limit = order.limit_price.unwrap_or(bar.open.0);
                    let fillable = bar.low.0 <= limit && limit <= bar.high.0;
                    if fillable {
                        (Some(limit), 0.0)
                    } else if order.tif == TimeInForce::Ioc {
                        order.status = OrderStatus::Cancelled;
                        (None, 0.0)
                    } else {
                        (None, 0.0)
                    }
                }
                _ => unreachable!(),
            };

            if let Some(price) = filled {
                order.status = OrderStatus::Filled;
                if self.position.is_none() && !order.reduce_only {
                    let fill = self.open_position(&order, price, bar.ts_open, order.leverage, entry_slippage_bps);
                    step.fills.push(fill);
                } else if let Some(trade) = self.close_position(price, bar.ts_open, ExitReason::SignalExit, effective_type == OrderType::Market) {
                    step.closed_trades.push(trade);
                }
                continue;
            }

            if order.status == OrderStatus::Pending {
                if order.expire_after_bars > 0 {
                    order.bars_waited += 1;
                    if order.bars_waited >= order.expire_after_bars {
                        order.status = OrderStatus::Cancelled;
                        continue;
                    }
                }
                still_pending.push(order);
            }
        }
        self.pending_orders = still_pending;
    }

    /// MAE/MFE are updated from the 1m path unconditionally (§4.H: "updated
    /// continuously ... regardless of exit"), independent of `exit_mode`.
    fn update_mae_mfe(&mut self, bar: &Bar) {
        let Some(pos) = self.position.as_mut() else { return };
        let low = bar.low.0;
        let high = bar.high.0;
        pos.mfe = pos.mfe.max(pos.side.sign() * (high - pos.entry_price)).max(pos.side.sign() * (low - pos.entry_price));
        pos.mae = pos.mae.min(pos.side.sign() * (high - pos.entry_price)).min(pos.side.sign() * (low - pos.entry_price));
    }

    fn check_tp_sl(&mut self, bar: &Bar, step: &mut StepResult) {
        let Some(pos) = self.position.as_mut() else { return };

        let low = bar.low.0;
        let high = bar.high.0;

        let sl_hit = pos.sl_price.is_some_and(|sl| match pos.side {
            TradeSide::Long => low <= sl,
            TradeSide::Short => high >= sl,
        });
        let tp_hit = pos.tp_price.is_some_and(|tp| match pos.side {
            TradeSide::Long => high >= tp,
            TradeSide::Short => low <= tp,
        });

        if !sl_hit && !tp_hit {
            return;
        }

        // SL wins when both trigger in the same 1m bar (§4.H).
        let (exit_price, reason) = if sl_hit {
            (pos.sl_price.unwrap(), ExitReason::StopLoss)
        } else {
            (pos.tp_price.unwrap(), ExitReason::TakeProfit)
        };

        if let Some(trade) = self.close_position(exit_price, bar.ts_close, reason, true) {
            step.closed_trades.push(trade);
        }
    }

    fn apply_funding(&mut self, bar: &Bar, step: &mut StepResult) {
        if !is_funding_settlement(bar.ts_open) {
            return;
        }
        let Some(pos) = self.position.as_mut() else { return };
        let rate = self.cfg.default_funding_rate_bps / 10_000.0;
        let notional = pos.qty * self.mark_price;
        let payment = notional * rate * pos.side.sign();
        pos.funding_accrued += payment;
        self.cash_balance -= payment;
        step.funding_events.push(FundingEvent { ts: bar.ts_open, rate, payment });
    }

    fn check_liquidation(&mut self, bar: &Bar, step: &mut StepResult) {
        let Some(pos) = self.position.clone() else { return };
        let equity_before = self.equity();
        if equity_before > self.maintenance_margin_requirement(&pos) {
            return;
        }
        let fee = pos.qty * pos.liq_price * self.cfg.liquidation_fee_bps / 10_000.0;
        if let Some(trade) = self.close_position_with_fee(pos.liq_price, bar.ts_close, ExitReason::Liquidation, fee) {
            step.closed_trades.push(trade);
        }
        step.liquidations.push(LiquidationEvent { ts: bar.ts_close, liq_price: pos.liq_price, fee, equity_before });
    }

    /// One 1-minute step of §4.H's ordering: settlement (funding, TP/SL,
    /// liquidation) *before* order matching for signals submitted by the
    /// strategy this step (orders take effect at the next 1m open).
    pub fn process_1m_bar(&mut self, bar: &Bar) -> StepResult {
        self.mark_price = bar.close.0;
        self.last_price = bar.close.0;

        let mut step = StepResult::default();
        self.apply_funding(bar, &mut step);
        self.update_mae_mfe(bar);
        // §4.H exit_mode: `signal` exits ignore SL/TP entirely; `sl_tp_only`
        // and `first_hit` both still check them (the latter breaks the tie
        // by whichever fires first, which `check_tp_sl` already does since
        // it runs before the strategy's own exit order can fill).
        if self.cfg.exit_mode != ExitMode::Signal {
            self.check_tp_sl(bar, &mut step);
        }
        if self.position.is_some() {
            self.check_liquidation(bar, &mut step);
        }
        self.try_fill_pending(bar, &mut step);

        if let Some(floor) = self.cfg.equity_floor {
            if self.equity() <= floor {
                step.equity_floor_hit = true;
            }
        }
        step
    }

    pub fn set_stop_loss(&mut self, price: f64) {
        if let Some(pos) = self.position.as_mut() {
            pos.sl_price = Some(price);
        }
    }

    pub fn set_take_profit(&mut self, price: f64) {
        if let Some(pos) = self.position.as_mut() {
            pos.tp_price = Some(price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Price, Volume};

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Bar {
        Bar { ts_open: ts, ts_close: ts + 60_000, open: Price(o), high: Price(h), low: Price(l), close: Price(c), volume: Volume(1.0) }
    }

    #[test]
    fn market_order_fills_at_next_bar_open_with_slippage() {
        let mut ex = SimulatedExchange::new(ExchangeConfig::default(), 10_000.0);
        ex.process_1m_bar(&bar(0, 100.0, 101.0, 99.0, 100.0));
        ex.submit_order(
            Order {
                id: 0,
                side: TradeSide::Long,
                order_type: OrderType::Market,
                qty: 1.0,
                leverage: 1.0,
                limit_price: None,
                trigger_price: None,
                tif: TimeInForce::Gtc,
                expire_after_bars: 0,
                bars_waited: 0,
                reduce_only: false,
                status: OrderStatus::Pending,
                submitted_ts: 0,
                triggered: false,
                pending_sl: None,
                pending_tp: None,
            },
            Some(5.0),
        )
        .unwrap();
        let step = ex.process_1m_bar(&bar(60_000, 101.0, 102.0, 100.0, 101.5));
        assert_eq!(step.fills.len(), 1);
        assert!(ex.position.is_some());
        let fill_price = step.fills[0].price;
        assert!((fill_price - 101.0 * 1.0001).abs() < 1e-9, "expected next-bar-open + slippage, got {fill_price}");
    }

    #[test]
    fn sl_wins_when_both_trigger_same_bar() {
        let mut ex = SimulatedExchange::new(ExchangeConfig::default(), 10_000.0);
        ex.mark_price = 100.0;
        ex.last_price = 100.0;
        ex.position = Some(Position {
            side: TradeSide::Long,
            qty: 1.0,
            entry_price: 100.0,
            entry_notional: 100.0,
            entry_fee: 0.0,
            leverage: 5.0,
            isolated_margin: 20.0,
            liq_price: 50.0,
            opened_ts: 0,
            sl_price: Some(95.0),
            tp_price: Some(105.0),
            break_even_triggered: false,
            mae: 0.0,
            mfe: 0.0,
            entry_slippage_bps: 0.0,
            funding_accrued: 0.0,
        });
        let step = ex.process_1m_bar(&bar(60_000, 100.0, 106.0, 94.0, 100.0));
        assert_eq!(step.closed_trades.len(), 1);
        assert_eq!(step.closed_trades[0].exit_reason, ExitReason::StopLoss);
    }
}
