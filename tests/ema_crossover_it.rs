//! S1: a single-timeframe EMA crossover Play should open at least one long
//! trade against a clean uptrend and never open a short (long-only policy).

mod common;

use perpforge::domain::TradeSide;
use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn play_yaml() -> &'static str {
    r#"
name: ema_cross
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
  exec: med
account:
  starting_equity: 10000
features:
  ema_fast:
    indicator_type: ema
    length: 9
  ema_slow:
    indicator_type: ema
    length: 21
actions:
  enter_long: ["ema_fast", "cross_above", "ema_slow"]
  exit_long: ["ema_fast", "cross_below", "ema_slow"]
risk:
  leverage: 1
  max_leverage: 1
  stop_loss: { type: percent, pct: 2 }
  take_profit: { type: percent, pct: 4 }
position_policy: long
"#
}

#[test]
fn opens_at_least_one_long_trade_on_a_clean_uptrend() {
    let provider = common::provider_for(SyntheticPattern::TrendUpClean, 0);
    let outcome = run_play(play_yaml(), common::no_vars(), &provider, common::TWO_DAY_WINDOW.0, common::TWO_DAY_WINDOW.1)
        .expect("run should succeed");

    assert!(!outcome.report.trades.is_empty(), "expected at least one closed trade");
    assert!(outcome.report.trades.iter().all(|t| t.side == TradeSide::Long));
}

#[test]
fn equity_curve_is_monotonically_indexed_by_timestamp() {
    let provider = common::provider_for(SyntheticPattern::TrendUpClean, 0);
    let outcome = run_play(play_yaml(), common::no_vars(), &provider, common::TWO_DAY_WINDOW.0, common::TWO_DAY_WINDOW.1)
        .unwrap();
    let mut last_ts = i64::MIN;
    for point in &outcome.report.equity_curve {
        assert!(point.ts >= last_ts);
        last_ts = point.ts;
    }
}
