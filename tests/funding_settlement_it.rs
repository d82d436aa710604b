//! S6: a position held across a funding settlement boundary (00:00 / 08:00 /
//! 16:00 UTC) accrues a nonzero funding payment, and the metrics record
//! reports it separately from trading fees.

mod common;

use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn buy_and_hold_play() -> &'static str {
    r#"
name: buy_and_hold
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
    length: 3
actions:
  enter_long: ["close", ">", 0]
risk:
  leverage: 2
  max_leverage: 2
  sizing: { model: percent_equity, pct: 20 }
position_policy: long
"#
}

#[test]
fn a_position_held_across_settlement_boundaries_accrues_funding() {
    // Five days is comfortably more than the 8h settlement cadence, so any
    // position opened early in the window crosses multiple settlements.
    let start_ms = 10 * 24 * 3_600_000i64;
    let end_ms = start_ms + 5 * 24 * 3_600_000i64;
    let provider = common::provider_for(SyntheticPattern::RangeTight, 0);
    let outcome = run_play(buy_and_hold_play(), common::no_vars(), &provider, start_ms, end_ms)
        .expect("buy-and-hold play should run to completion");

    let funding_events = outcome.report.events.iter().filter(|e| e.contains("\"type\":\"funding\"")).count();
    assert!(funding_events > 0, "expected at least one funding settlement event over a 5-day hold");
    assert_ne!(outcome.metrics.total_funding_paid_usdt, 0.0);
}
