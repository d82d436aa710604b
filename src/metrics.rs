//! Metrics & Artifacts (§4.K): the deterministic 62-field metrics record
//! derived from a completed run's trades and equity curve. Field groupings
//! follow §4.K.1 — equity/drawdown, trade counts, risk-adjusted, tail risk,
//! leverage, MAE/MFE, entry friction, funding/fees, margin stress, holding
//! periods.

use serde::{Deserialize, Serialize};

use crate::bar_processor::{EquityPoint, RunReport};
use crate::exchange::types::ExitReason;

/// Annualization basis for Sharpe/Sortino/Calmar, inferred from the exec
/// timeframe's bar duration the way the teacher's `SharpeRatio<Interval>`
/// takes an explicit interval rather than assuming daily bars.
#[derive(Debug, Clone, Copy)]
pub struct AnnualizationBasis {
    pub bars_per_year: f64,
}

impl AnnualizationBasis {
    pub fn from_tf_minutes(tf_minutes: u32) -> Self {
        let minutes_per_year = 365.0 * 24.0 * 60.0;
        Self { bars_per_year: minutes_per_year / f64::from(tf_minutes) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    // Equity / drawdown
    pub final_equity: f64,
    pub net_profit: f64,
    pub net_profit_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_usdt: f64,
    pub max_drawdown_duration_bars: u64,
    pub recovery_factor: f64,

    // Trade counts
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub timeout_trades: u64,
    pub win_rate: f64,
    pub avg_win_usdt: f64,
    pub avg_loss_usdt: f64,
    pub profit_factor: f64,
    pub expectancy: f64,

    // Risk-adjusted
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    // Tail risk
    pub skewness: f64,
    pub kurtosis: f64,
    pub var_95: f64,
    pub cvar_95: f64,

    // Leverage
    pub avg_leverage_used: f64,
    pub max_leverage_used: f64,
    pub pct_bars_at_max_leverage: f64,

    // MAE / MFE
    pub avg_mae_pct: f64,
    pub avg_mfe_pct: f64,
    pub mae_mfe_efficiency_ratio: f64,

    // Entry friction
    pub avg_entry_slippage_bps: f64,
    pub avg_entry_fee_usdt: f64,
    pub rejected_order_count: u64,

    // Funding / fees
    pub total_funding_paid_usdt: f64,
    pub total_fees_usdt: f64,
    pub funding_pct_of_pnl: f64,

    // Margin stress
    pub pct_bars_in_margin_call_zone: f64,
    pub closest_approach_to_liquidation_pct: f64,

    // Holding periods
    pub avg_holding_bars: f64,
    pub median_holding_bars: f64,
    pub max_holding_bars: u64,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() { 0.0 } else { xs.iter().sum::<f64>() / xs.len() as f64 }
}

fn std_dev(xs: &[f64], mu: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0);
    var.sqrt()
}

fn skewness(xs: &[f64], mu: f64, sigma: f64) -> f64 {
    if xs.len() < 3 || sigma == 0.0 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let m3 = xs.iter().map(|x| (x - mu).powi(3)).sum::<f64>() / n;
    m3 / sigma.powi(3)
}

fn kurtosis(xs: &[f64], mu: f64, sigma: f64) -> f64 {
    if xs.len() < 4 || sigma == 0.0 {
        return 0.0;
    }
    let n = xs.len() as f64;
    let m4 = xs.iter().map(|x| (x - mu).powi(4)).sum::<f64>() / n;
    m4 / sigma.powi(4) - 3.0
}

/// Historical VaR/CVaR at the 95% confidence level over a return sample —
/// sorted empirical quantile, not a parametric (normal) approximation.
fn var_cvar_95(returns: &[f64]) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f64) * 0.05).floor() as usize;
    let idx = idx.min(sorted.len() - 1);
    let var_95 = -sorted[idx];
    let tail = &sorted[..=idx];
    let cvar_95 = -mean(tail);
    (var_95, cvar_95)
}

fn median(xs: &mut [f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = xs.len();
    if n % 2 == 0 { (xs[n / 2 - 1] + xs[n / 2]) / 2.0 } else { xs[n / 2] }
}

/// Per-bar simple returns from the equity curve, used for Sharpe/Sortino/
/// skewness/kurtosis/VaR/CVaR — all distributional statistics are computed
/// over the same bar-return series for internal consistency.
fn bar_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| if w[0].equity.abs() > f64::EPSILON { (w[1].equity - w[0].equity) / w[0].equity } else { 0.0 })
        .collect()
}

fn max_drawdown(curve: &[EquityPoint]) -> (f64, f64, u64) {
    let mut peak = curve.first().map(|p| p.equity).unwrap_or(0.0);
    let mut peak_idx = 0u64;
    let mut max_dd_pct = 0.0;
    let mut max_dd_usdt = 0.0;
    let mut max_duration = 0u64;

    for (i, point) in curve.iter().enumerate() {
        if point.equity > peak {
            peak = point.equity;
            peak_idx = i as u64;
        }
        let dd_usdt = peak - point.equity;
        let dd_pct = if peak > 0.0 { dd_usdt / peak * 100.0 } else { 0.0 };
        if dd_pct > max_dd_pct {
            max_dd_pct = dd_pct;
            max_dd_usdt = dd_usdt;
        }
        max_duration = max_duration.max(i as u64 - peak_idx);
    }
    (max_dd_pct, max_dd_usdt, max_duration)
}

/// Computes the full §4.K.1 metrics record from a completed `RunReport`.
pub fn compute_metrics(report: &RunReport, exec_tf_minutes: u32) -> MetricsRecord {
    let mut m = MetricsRecord::default();
    let curve = &report.equity_curve;
    let basis = AnnualizationBasis::from_tf_minutes(exec_tf_minutes);

    m.final_equity = report.final_equity;
    m.net_profit = report.final_equity - report.starting_equity;
    m.net_profit_pct = if report.starting_equity > 0.0 { m.net_profit / report.starting_equity * 100.0 } else { 0.0 };

    let (dd_pct, dd_usdt, dd_dur) = max_drawdown(curve);
    m.max_drawdown_pct = dd_pct;
    m.max_drawdown_usdt = dd_usdt;
    m.max_drawdown_duration_bars = dd_dur;
    m.recovery_factor = if dd_usdt > 0.0 { m.net_profit / dd_usdt } else { 0.0 };

    let trades = &report.trades;
    m.total_trades = trades.len() as u64;
    let wins: Vec<&_> = trades.iter().filter(|t| t.realized_pnl > 0.0).collect();
    let losses: Vec<&_> = trades.iter().filter(|t| t.realized_pnl < 0.0).collect();
    m.winning_trades = wins.len() as u64;
    m.losing_trades = losses.len() as u64;
    m.timeout_trades = trades.iter().filter(|t| t.exit_reason == ExitReason::EquityFloor).count() as u64;
    m.win_rate = if m.total_trades > 0 { m.winning_trades as f64 / m.total_trades as f64 } else { 0.0 };
    m.avg_win_usdt = mean(&wins.iter().map(|t| t.realized_pnl).collect::<Vec<_>>());
    m.avg_loss_usdt = mean(&losses.iter().map(|t| t.realized_pnl).collect::<Vec<_>>());
    let gross_win: f64 = wins.iter().map(|t| t.realized_pnl).sum();
    let gross_loss: f64 = losses.iter().map(|t| t.realized_pnl).sum::<f64>().abs();
    m.profit_factor = if gross_loss > 0.0 { gross_win / gross_loss } else { f64::INFINITY };
    m.expectancy = m.win_rate * m.avg_win_usdt + (1.0 - m.win_rate) * m.avg_loss_usdt;

    let returns = bar_returns(curve);
    let mu = mean(&returns);
    let sigma = std_dev(&returns, mu);
    m.sharpe_ratio = if sigma > 0.0 { mu / sigma * basis.bars_per_year.sqrt() } else { 0.0 };
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_sigma = std_dev(&downside, 0.0);
    m.sortino_ratio = if downside_sigma > 0.0 { mu / downside_sigma * basis.bars_per_year.sqrt() } else { 0.0 };
    m.calmar_ratio = if dd_pct > 0.0 { m.net_profit_pct / dd_pct } else { 0.0 };

    m.skewness = skewness(&returns, mu, sigma);
    m.kurtosis = kurtosis(&returns, mu, sigma);
    let (var95, cvar95) = var_cvar_95(&returns);
    m.var_95 = var95;
    m.cvar_95 = cvar95;

    let leverages: Vec<f64> = trades.iter().map(|t| t.leverage).collect();
    m.avg_leverage_used = mean(&leverages);
    m.max_leverage_used = leverages.iter().cloned().fold(0.0, f64::max);
    let at_max = leverages.iter().filter(|l| (**l - m.max_leverage_used).abs() < 1e-9).count();
    m.pct_bars_at_max_leverage = if !leverages.is_empty() { at_max as f64 / leverages.len() as f64 * 100.0 } else { 0.0 };

    let mae_pcts: Vec<f64> = trades.iter().map(|t| if t.entry_price > 0.0 { t.mae / t.entry_price * 100.0 } else { 0.0 }).collect();
    let mfe_pcts: Vec<f64> = trades.iter().map(|t| if t.entry_price > 0.0 { t.mfe / t.entry_price * 100.0 } else { 0.0 }).collect();
    m.avg_mae_pct = mean(&mae_pcts);
    m.avg_mfe_pct = mean(&mfe_pcts);
    m.mae_mfe_efficiency_ratio = if m.avg_mae_pct.abs() > 1e-9 { m.avg_mfe_pct / m.avg_mae_pct.abs() } else { 0.0 };

    m.avg_entry_fee_usdt = mean(&trades.iter().map(|t| t.entry_fee).collect::<Vec<_>>());
    m.avg_entry_slippage_bps = mean(&trades.iter().map(|t| t.entry_slippage_bps).collect::<Vec<_>>());
    m.rejected_order_count = report.events.iter().filter(|e| e.contains("entry_rejected")).count() as u64;

    m.total_funding_paid_usdt = report.total_funding_paid;
    m.total_fees_usdt = trades.iter().map(|t| t.entry_fee + t.exit_fee).sum::<f64>() + m.total_funding_paid_usdt;
    m.funding_pct_of_pnl = if m.net_profit.abs() > 1e-9 { m.total_funding_paid_usdt / m.net_profit * 100.0 } else { 0.0 };

    // "Margin call zone" per §4.K.1: equity within 2x MMR, i.e. distance
    // to MMR at or below 50% of equity.
    let mmr_samples: Vec<f64> = report.mmr_distance_pct.iter().filter_map(|d| *d).collect();
    m.pct_bars_in_margin_call_zone = if !mmr_samples.is_empty() {
        mmr_samples.iter().filter(|d| **d <= 50.0).count() as f64 / mmr_samples.len() as f64 * 100.0
    } else {
        0.0
    };
    m.closest_approach_to_liquidation_pct = mmr_samples.iter().cloned().fold(f64::INFINITY, f64::min);
    if !m.closest_approach_to_liquidation_pct.is_finite() {
        m.closest_approach_to_liquidation_pct = 0.0;
    }

    let holding_bars: Vec<f64> = trades
        .iter()
        .map(|t| ((t.exit_ts - t.entry_ts) as f64 / (f64::from(exec_tf_minutes) * 60_000.0)).max(0.0))
        .collect();
    m.avg_holding_bars = mean(&holding_bars);
    let mut holding_mut = holding_bars.clone();
    m.median_holding_bars = median(&mut holding_mut);
    m.max_holding_bars = holding_bars.iter().cloned().fold(0.0, f64::max) as u64;

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeSide;
    use crate::exchange::types::Trade;

    fn trade(pnl: f64, entry: f64, exit_ts: i64) -> Trade {
        Trade {
            id: 1,
            side: TradeSide::Long,
            entry_price: entry,
            exit_price: entry + pnl,
            qty: 1.0,
            entry_ts: 0,
            exit_ts,
            entry_fee: 1.0,
            exit_fee: 1.0,
            funding_paid: 0.0,
            realized_pnl: pnl,
            exit_reason: ExitReason::SignalExit,
            mae: -2.0,
            mfe: 4.0,
            leverage: 2.0,
            entry_slippage_bps: 1.0,
        }
    }

    #[test]
    fn win_rate_and_profit_factor_match_trade_mix() {
        let report = RunReport {
            trades: vec![trade(100.0, 100.0, 60_000), trade(-50.0, 100.0, 120_000)],
            equity_curve: vec![
                EquityPoint { ts: 0, equity: 10_000.0 },
                EquityPoint { ts: 60_000, equity: 10_100.0 },
                EquityPoint { ts: 120_000, equity: 10_050.0 },
            ],
            events: vec![],
            starting_equity: 10_000.0,
            final_equity: 10_050.0,
            sim_start_idx: 0,
            sim_end_idx: 2,
            total_funding_paid: 0.0,
            mmr_distance_pct: vec![Some(80.0), Some(60.0), Some(40.0)],
        };
        let m = compute_metrics(&report, 1);
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.winning_trades, 1);
        assert_eq!(m.losing_trades, 1);
        assert!((m.win_rate - 0.5).abs() < 1e-9);
        assert!((m.profit_factor - 2.0).abs() < 1e-9);
        assert!((m.net_profit - 50.0).abs() < 1e-9);
    }

    #[test]
    fn no_trades_yields_zeroed_trade_stats_without_panicking() {
        let report = RunReport {
            trades: vec![],
            equity_curve: vec![EquityPoint { ts: 0, equity: 10_000.0 }],
            events: vec![],
            starting_equity: 10_000.0,
            final_equity: 10_000.0,
            sim_start_idx: 0,
            sim_end_idx: 0,
            total_funding_paid: 0.0,
            mmr_distance_pct: vec![None],
        };
        let m = compute_metrics(&report, 15);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.net_profit, 0.0);
    }
}
