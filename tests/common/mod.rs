use std::collections::HashMap;
use std::sync::Once;

use perpforge::provider::{generate_synthetic, StaticProvider, SyntheticPattern};
use perpforge::time::Timeframe;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary so `#[instrument]`d
/// runs (`run_bar_processor`) emit readable output on failure.
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Builds a provider with enough 1m/15m/1h history for a two-day window
/// starting at `start_ts`, following whichever `pattern` the scenario needs.
pub fn provider_for(pattern: SyntheticPattern, start_ts: i64) -> StaticProvider {
    init_tracing();
    let bars_1m = generate_synthetic(pattern, Timeframe::M1, 1, 20_000, start_ts);
    let bars_15m = generate_synthetic(pattern, Timeframe::M15, 1, 2_000, start_ts);
    let bars_1h = generate_synthetic(pattern, Timeframe::H1, 1, 500, start_ts);
    StaticProvider::new()
        .with_series("BTCUSDT", Timeframe::M1, bars_1m)
        .with_series("BTCUSDT", Timeframe::M15, bars_15m)
        .with_series("BTCUSDT", Timeframe::H1, bars_1h)
}

pub fn no_vars() -> HashMap<String, String> {
    HashMap::new()
}

pub const TWO_DAY_WINDOW: (i64, i64) = (2 * 24 * 3_600_000, 4 * 24 * 3_600_000);
