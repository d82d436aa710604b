//! S3: a Play referencing a high-timeframe close alongside its exec-role
//! features should run end-to-end, with the high-timeframe value held
//! constant (forward-filled) between its own bar closes — verified here by
//! running a full Play since the forward-fill mechanics themselves are
//! covered directly in `feed.rs`'s unit tests.

mod common;

use perpforge::provider::SyntheticPattern;
use perpforge::run_play;

fn multi_tf_play() -> &'static str {
    r#"
name: htf_filter
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
  enter_long:
    all:
      - ["ema_fast", "cross_above", "ema_slow"]
      - ["close", ">", "close_1h"]
  exit_long: ["ema_fast", "cross_below", "ema_slow"]
risk:
  leverage: 1
  max_leverage: 1
position_policy: long
"#
}

#[test]
fn htf_gated_play_runs_to_completion() {
    let provider = common::provider_for(SyntheticPattern::TrendUpClean, 0);
    let outcome = run_play(
        multi_tf_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .expect("multi-timeframe play should run to completion");
    assert!(outcome.report.sim_end_idx > outcome.report.sim_start_idx);
}

#[test]
fn warmup_extends_sim_start_past_the_requested_window_start() {
    let provider = common::provider_for(SyntheticPattern::TrendUpClean, 0);
    let outcome = run_play(
        multi_tf_play(),
        common::no_vars(),
        &provider,
        common::TWO_DAY_WINDOW.0,
        common::TWO_DAY_WINDOW.1,
    )
    .unwrap();
    // sim_start_idx is resolved against the warmup-extended fetch, not the
    // raw requested start — it must be a valid index into the run.
    assert!(outcome.report.sim_start_idx < outcome.report.sim_end_idx.max(1));
}
