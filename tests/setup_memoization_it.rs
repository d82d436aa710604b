//! S5: a setup referenced by more than one action is evaluated consistently
//! wherever it's used, and a setup that references itself (directly or
//! transitively) is rejected at compile time rather than causing infinite
//! recursion at evaluation time.

mod common;

use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn shared_setup_play() -> &'static str {
    r#"
name: shared_setup
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
setups:
  trend_up:
    all:
      - ["ema_fast", ">", "ema_slow"]
      - ["close", ">", "ema_slow"]
actions:
  enter_long:
    setup: trend_up
  exit_long:
    not:
      setup: trend_up
risk:
  leverage: 1
  max_leverage: 1
position_policy: long
"#
}

fn cyclic_setup_play() -> &'static str {
    r#"
name: cyclic_setup
symbol: BTCUSDT
account:
  starting_equity: 10000
setups:
  a:
    setup: b
  b:
    setup: a
actions:
  enter_long:
    setup: a
"#
}

#[test]
fn setup_shared_across_entry_and_exit_runs_consistently() {
    let provider = common::provider_for(SyntheticPattern::TrendUpClean, 0);
    let outcome = run_play(
        shared_setup_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .expect("shared-setup play should run to completion");
    // enter_long and exit_long are logical negations of the same setup, so
    // the position policy's long-only constraint is the only thing that can
    // ever leave a position open across the run.
    assert!(outcome.report.sim_end_idx >= outcome.report.sim_start_idx);
}

#[test]
fn self_referential_setup_cycle_is_rejected_at_load_time() {
    let provider = common::provider_for(SyntheticPattern::RangeTight, 0);
    let err = run_play(
        cyclic_setup_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    );
    assert!(err.is_err(), "a setup cycle must be rejected before the bar processor ever runs");
}
