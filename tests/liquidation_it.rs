//! S4: a long position opened at high leverage into a clean downtrend, with
//! no stop-loss to cut the loss first, must eventually be liquidated rather
//! than the simulation tolerating negative equity.

mod common;

use perpforge::exchange::types::ExitReason;
use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn high_leverage_play() -> &'static str {
    r#"
name: overleveraged_long
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
  exec: med
account:
  starting_equity: 1000
features:
  ema_fast:
    indicator_type: ema
    length: 3
  ema_slow:
    indicator_type: ema
    length: 200
actions:
  enter_long: ["ema_fast", ">", "ema_slow"]
risk:
  leverage: 50
  max_leverage: 50
  sizing: { model: percent_equity, pct: 90 }
position_policy: long
"#
}

#[test]
fn overleveraged_long_gets_liquidated_in_a_clean_downtrend() {
    let provider = common::provider_for(SyntheticPattern::TrendDownClean, 0);
    let outcome = run_play(
        high_leverage_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .expect("run should succeed even when a liquidation occurs");

    assert!(!outcome.report.trades.is_empty(), "expected the entry to open a trade");
    assert!(
        outcome.report.trades.iter().any(|t| t.exit_reason == ExitReason::Liquidation),
        "expected at least one trade to close via liquidation, got reasons: {:?}",
        outcome.report.trades.iter().map(|t| t.exit_reason).collect::<Vec<_>>()
    );
    assert!(outcome.report.final_equity >= 0.0, "equity must never go negative");
}
