//! Order, position, and trade types for the simulated exchange (§3.7, §4.H).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::domain::TradeSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

/// An unfilled instruction resting on the book. `expire_after_bars` is
/// counted in exec-bar terms; `0` means no expiry (§4.H).
#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub side: TradeSide,
    pub order_type: OrderType,
    pub qty: f64,
    /// Leverage to open the position at, if this order is an entry
    /// (ignored for reduce-only/exit orders).
    pub leverage: f64,
    pub limit_price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub tif: TimeInForce,
    pub expire_after_bars: u32,
    pub bars_waited: u32,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub submitted_ts: i64,
    /// Once a stop order's trigger condition fires it behaves as the
    /// underlying market/limit order from that 1m bar forward.
    pub triggered: bool,
    /// Entry-side SL/TP carried on the order itself so they reach the
    /// `Position` at fill time, since a market order doesn't fill until
    /// the next 1m bar is seen (§4.H/§4.M).
    pub pending_sl: Option<f64>,
    pub pending_tp: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    SignalExit,
    StopLoss,
    TakeProfit,
    Liquidation,
    EquityFloor,
}

/// An open isolated-margin position. Exactly one may be open at a time
/// (one-way mode, §4.H).
#[derive(Debug, Clone)]
pub struct Position {
    pub side: TradeSide,
    pub qty: f64,
    pub entry_price: f64,
    pub entry_notional: f64,
    pub entry_fee: f64,
    pub leverage: f64,
    pub isolated_margin: f64,
    pub liq_price: f64,
    pub opened_ts: i64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub break_even_triggered: bool,
    pub mae: f64,
    pub mfe: f64,
    /// Slippage actually applied to the entry fill, in bps of entry price
    /// (0 for a limit/maker fill, §4.H entry friction).
    pub entry_slippage_bps: f64,
    /// Sum of `FundingEvent::payment` charged against this position while
    /// it has been open; copied into `Trade::funding_paid` at close (§3.7).
    pub funding_accrued: f64,
}

impl Position {
    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.side.sign() * self.qty * (mark - self.entry_price)
    }

    pub fn notional(&self, mark: f64) -> f64 {
        self.qty * mark
    }
}

/// A fully closed round trip, as written to `trades.parquet` (§4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub side: TradeSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub qty: f64,
    pub entry_ts: i64,
    pub exit_ts: i64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub funding_paid: f64,
    pub realized_pnl: f64,
    pub exit_reason: ExitReason,
    pub mae: f64,
    pub mfe: f64,
    pub leverage: f64,
    pub entry_slippage_bps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub ts: i64,
    pub side: TradeSide,
    pub price: f64,
    pub qty: f64,
    pub fee: f64,
    pub is_entry: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingEvent {
    pub ts: i64,
    pub rate: f64,
    pub payment: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub ts: i64,
    pub liq_price: f64,
    pub fee: f64,
    pub equity_before: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub fills: Vec<Fill>,
    pub funding_events: Vec<FundingEvent>,
    pub liquidations: Vec<LiquidationEvent>,
    pub closed_trades: Vec<Trade>,
    pub equity_floor_hit: bool,
}
