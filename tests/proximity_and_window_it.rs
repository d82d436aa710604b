//! S2: `near_pct` proximity semantics and window expressions (`holds_for`),
//! exercised end-to-end through a compiled Play rather than the evaluator
//! unit tests, which only cover the AST in isolation.

mod common;

use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn near_pct_play() -> &'static str {
    r#"
name: near_pct_entry
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
  exec: med
account:
  starting_equity: 10000
features:
  ema_mid:
    indicator_type: ema
    length: 20
actions:
  enter_long: ["close", "near_pct", "ema_mid", 0.5]
  exit_long: ["close", "near_pct", "ema_mid", 0.01]
risk:
  leverage: 1
  max_leverage: 1
  stop_loss: { type: percent, pct: 3 }
  take_profit: { type: percent, pct: 3 }
position_policy: long
"#
}

fn holds_for_play() -> &'static str {
    r#"
name: holds_for_entry
symbol: BTCUSDT
timeframes:
  low_tf: 1m
  med_tf: 15m
  high_tf: 1h
  exec: med
account:
  starting_equity: 10000
features:
  rsi:
    indicator_type: rsi
    length: 14
setups:
  oversold_held:
    holds_for:
      bars: 3
      expr: ["rsi", "<", 40]
actions:
  enter_long:
    setup: oversold_held
  exit_long: ["rsi", ">", 60]
risk:
  leverage: 1
  max_leverage: 1
position_policy: long
"#
}

#[test]
fn near_pct_play_compiles_and_runs_without_error() {
    let provider = common::provider_for(SyntheticPattern::RangeTight, 0);
    let outcome = run_play(
        near_pct_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .expect("near_pct play should run to completion");
    assert!(outcome.report.sim_end_idx >= outcome.report.sim_start_idx);
}

#[test]
fn holds_for_window_play_compiles_and_runs_without_error() {
    let provider = common::provider_for(SyntheticPattern::RangeTight, 0);
    let outcome = run_play(
        holds_for_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .expect("holds_for play should run to completion");
    assert!(outcome.report.sim_end_idx >= outcome.report.sim_start_idx);
}

#[test]
fn window_bars_beyond_cap_is_rejected_at_load_time() {
    let yaml = r#"
name: bad_window
symbol: BTCUSDT
account:
  starting_equity: 1000
setups:
  too_big:
    holds_for:
      bars: 99999
      expr: ["close", ">", 0]
actions:
  enter_long:
    setup: too_big
"#;
    let provider = common::provider_for(SyntheticPattern::RangeTight, 0);
    let err = run_play(yaml, common::no_vars(), &provider, common::TWO_DAY_WINDOW.0, common::TWO_DAY_WINDOW.1);
    assert!(err.is_err());
}
