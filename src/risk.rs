//! Risk policy (§4.M): position sizing, stop-loss/take-profit derivation,
//! break-even management, and the drawdown/leverage guard rails every entry
//! intent passes through before reaching the exchange.

use serde::{Deserialize, Serialize};

use crate::domain::TradeSide;
use crate::error::{EngineResult, SimError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SizingModel {
    PercentEquity { pct: f64 },
    RiskBased { pct: f64 },
    FixedUsdt { notional: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum StopLossSpec {
    Percent { pct: f64 },
    AtrMultiple { multiple: f64 },
    Structure { buffer_pct: f64 },
    FixedPoints { points: f64 },
    TrailingAtr { multiple: f64, activation_pct: f64 },
    TrailingPct { pct: f64, activation_pct: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TakeProfitSpec {
    Percent { pct: f64 },
    RrRatio { multiple: f64 },
    AtrMultiple { multiple: f64 },
    FixedPoints { points: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakEvenSpec {
    pub activation_pct: f64,
    pub offset_pct: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub sizing: SizingModel,
    pub leverage: f64,
    pub max_leverage: f64,
    pub stop_loss: Option<StopLossSpec>,
    pub take_profit: Option<TakeProfitSpec>,
    pub break_even: Option<BreakEvenSpec>,
    pub max_drawdown_pct: f64,
    pub clamp_over_leverage_cap: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryPlan {
    pub qty: f64,
    pub notional: f64,
    pub sl_price: Option<f64>,
    pub tp_price: Option<f64>,
}

impl RiskPolicy {
    fn stop_distance(&self, entry_price: f64, atr: Option<f64>, structure_level: Option<f64>) -> Option<f64> {
        match self.stop_loss? {
            StopLossSpec::Percent { pct } => Some(entry_price * (pct / 100.0) / self.leverage),
            StopLossSpec::AtrMultiple { multiple } => atr.map(|a| a * multiple),
            StopLossSpec::Structure { buffer_pct } => {
                structure_level.map(|level| (entry_price - level).abs() * (1.0 + buffer_pct / 100.0))
            }
            StopLossSpec::FixedPoints { points } => Some(points),
            StopLossSpec::TrailingAtr { multiple, .. } => atr.map(|a| a * multiple),
            StopLossSpec::TrailingPct { pct, .. } => Some(entry_price * (pct / 100.0) / self.leverage),
        }
    }

    /// §4.M sizing: returns notional + quantity for one entry, before
    /// leverage-cap/drawdown checks.
    fn size(&self, equity: f64, entry_price: f64, stop_distance: Option<f64>) -> f64 {
        match self.sizing {
            SizingModel::PercentEquity { pct } => {
                let margin = equity * pct / 100.0;
                margin * self.leverage
            }
            SizingModel::RiskBased { pct } => {
                let risk_usd = equity * pct / 100.0;
                let dist = stop_distance.unwrap_or(entry_price * 0.01).max(f64::EPSILON);
                let qty = risk_usd / dist;
                (qty * entry_price).min(equity * self.max_leverage)
            }
            SizingModel::FixedUsdt { notional } => notional.min(equity * self.max_leverage),
        }
    }

    /// Builds a complete entry plan, rejecting or clamping per config when
    /// the resulting notional would exceed the leverage cap, and rejecting
    /// outright when the account is already in excessive drawdown.
    pub fn plan_entry(
        &self,
        side: TradeSide,
        equity: f64,
        current_drawdown_pct: f64,
        entry_price: f64,
        atr: Option<f64>,
        structure_level: Option<f64>,
    ) -> EngineResult<EntryPlan> {
        if current_drawdown_pct >= self.max_drawdown_pct {
            return Err(SimError::RiskRejected { exec_idx: 0, reason: format!("drawdown {current_drawdown_pct:.2}% >= max {:.2}%", self.max_drawdown_pct) }.into());
        }

        let stop_distance = self.stop_distance(entry_price, atr, structure_level);
        let mut notional = self.size(equity, entry_price, stop_distance);

        let cap = equity * self.max_leverage;
        if notional > cap {
            if self.clamp_over_leverage_cap {
                notional = cap;
            } else {
                return Err(SimError::RiskRejected { exec_idx: 0, reason: format!("notional {notional:.2} exceeds leverage cap {cap:.2}") }.into());
            }
        }

        let qty = notional / entry_price;
        let sl_price = stop_distance.map(|d| match side {
            TradeSide::Long => entry_price - d,
            TradeSide::Short => entry_price + d,
        });
        let tp_price = self.take_profit.map(|tp| {
            let dist = match tp {
                TakeProfitSpec::Percent { pct } => entry_price * (pct / 100.0) / self.leverage,
                TakeProfitSpec::RrRatio { multiple } => stop_distance.unwrap_or(entry_price * 0.01) * multiple,
                TakeProfitSpec::AtrMultiple { multiple } => atr.unwrap_or(entry_price * 0.01) * multiple,
                TakeProfitSpec::FixedPoints { points } => points,
            };
            match side {
                TradeSide::Long => entry_price + dist,
                TradeSide::Short => entry_price - dist,
            }
        });

        Ok(EntryPlan { qty, notional, sl_price, tp_price })
    }

    /// Break-even (§9 resolved Open Question): `offset_pct` is always the
    /// distance from entry *in the trade's favor*, regardless of side —
    /// a long's break-even stop sits above entry, a short's sits below.
    pub fn break_even_stop(&self, side: TradeSide, entry_price: f64, profit_pct: f64) -> Option<f64> {
        let spec = self.break_even?;
        if profit_pct < spec.activation_pct {
            return None;
        }
        let offset = entry_price * (spec.offset_pct / 100.0);
        Some(match side {
            TradeSide::Long => entry_price + offset,
            TradeSide::Short => entry_price - offset,
        })
    }

    /// Trailing-stop update: only ever tightens the stop, never loosens it.
    pub fn trailing_stop_update(&self, side: TradeSide, mark: f64, profit_pct: f64, atr: Option<f64>, current_sl: Option<f64>) -> Option<f64> {
        let trail_distance = match self.stop_loss? {
            StopLossSpec::TrailingAtr { multiple, activation_pct } if profit_pct >= activation_pct => atr.map(|a| a * multiple),
            StopLossSpec::TrailingPct { pct, activation_pct } if profit_pct >= activation_pct => Some(mark * pct / 100.0 / self.leverage),
            _ => None,
        }?;
        let candidate = match side {
            TradeSide::Long => mark - trail_distance,
            TradeSide::Short => mark + trail_distance,
        };
        Some(match (side, current_sl) {
            (TradeSide::Long, Some(existing)) => candidate.max(existing),
            (TradeSide::Short, Some(existing)) => candidate.min(existing),
            (_, None) => candidate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RiskPolicy {
        RiskPolicy {
            sizing: SizingModel::PercentEquity { pct: 10.0 },
            leverage: 5.0,
            max_leverage: 10.0,
            stop_loss: Some(StopLossSpec::Percent { pct: 2.0 }),
            take_profit: Some(TakeProfitSpec::RrRatio { multiple: 2.0 }),
            break_even: Some(BreakEvenSpec { activation_pct: 1.0, offset_pct: 0.1 }),
            max_drawdown_pct: 20.0,
            clamp_over_leverage_cap: true,
        }
    }

    #[test]
    fn rejects_entry_beyond_max_drawdown() {
        let p = policy();
        let err = p.plan_entry(TradeSide::Long, 10_000.0, 25.0, 100.0, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn long_and_short_break_even_both_favor_the_trade() {
        let p = policy();
        let long_be = p.break_even_stop(TradeSide::Long, 100.0, 2.0).unwrap();
        let short_be = p.break_even_stop(TradeSide::Short, 100.0, 2.0).unwrap();
        assert!(long_be > 100.0);
        assert!(short_be < 100.0);
    }

    #[test]
    fn rr_ratio_take_profit_scales_stop_distance() {
        let p = policy();
        let plan = p.plan_entry(TradeSide::Long, 10_000.0, 0.0, 100.0, None, None).unwrap();
        let stop_dist = 100.0 - plan.sl_price.unwrap();
        let tp_dist = plan.tp_price.unwrap() - 100.0;
        assert!((tp_dist - 2.0 * stop_dist).abs() < 1e-9);
    }
}
