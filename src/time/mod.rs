//! Bar & time primitives (§4.A): timeframe arithmetic and funding-settlement
//! schedule. All timestamp arithmetic is pure integer milliseconds — never
//! mixed with a naive/aware `chrono` representation in the hot loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::error::{DataError, EngineResult};

pub const MINUTE_MS: i64 = 60_000;
pub const FUNDING_SETTLEMENT_HOURS: [u32; 3] = [0, 8, 16];

/// A supported timeframe string, e.g. `15m`, `1h`, `D`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    IntoStaticStr,
    Display,
)]
pub enum Timeframe {
    #[strum(serialize = "1m")]
    M1,
    #[strum(serialize = "3m")]
    M3,
    #[strum(serialize = "5m")]
    M5,
    #[strum(serialize = "15m")]
    M15,
    #[strum(serialize = "30m")]
    M30,
    #[strum(serialize = "1h")]
    H1,
    #[strum(serialize = "2h")]
    H2,
    #[strum(serialize = "4h")]
    H4,
    #[strum(serialize = "6h")]
    H6,
    #[strum(serialize = "12h")]
    H12,
    #[strum(serialize = "D")]
    D1,
    #[strum(serialize = "W")]
    W1,
    #[strum(serialize = "M")]
    Mo1,
}

impl Timeframe {
    /// Minutes per bar. Calendar months/weeks use their nominal length;
    /// month bars are handled by the feed store via calendar boundaries, not
    /// fixed minute counts, so `tf_minutes` on `Mo1` is only used for warmup
    /// estimation, never for boundary arithmetic.
    pub const fn tf_minutes(self) -> u32 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
            Timeframe::W1 => 1440 * 7,
            Timeframe::Mo1 => 1440 * 30,
        }
    }

    pub fn is_calendar(self) -> bool {
        matches!(self, Timeframe::W1 | Timeframe::Mo1)
    }
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Timeframe::*;
        Ok(match s {
            "1m" => M1,
            "3m" => M3,
            "5m" => M5,
            "15m" => M15,
            "30m" => M30,
            "1h" => H1,
            "2h" => H2,
            "4h" => H4,
            "6h" => H6,
            "12h" => H12,
            "D" => D1,
            "W" => W1,
            "M" => Mo1,
            other => return Err(DataError::InvalidSymbol(format!("invalid timeframe '{other}'"))),
        })
    }
}

/// `floor_to_bar_boundary`: largest `ts_open` multiple of `tf` at or before `ts`.
pub fn floor_to_bar_boundary(ts_ms: i64, tf: Timeframe) -> i64 {
    let step = i64::from(tf.tf_minutes()) * MINUTE_MS;
    ts_ms.div_euclid(step) * step
}

/// `ceil_to_tf_close`: `ts_open + tf_duration` for the bar containing `ts`.
pub fn ceil_to_tf_close(ts_ms: i64, tf: Timeframe) -> i64 {
    floor_to_bar_boundary(ts_ms, tf) + i64::from(tf.tf_minutes()) * MINUTE_MS
}

/// Funding is settled at 00:00, 08:00, 16:00 UTC exactly.
pub fn is_funding_settlement(ts_ms: i64) -> bool {
    let ms_per_day = 24 * 60 * MINUTE_MS;
    let into_day = ts_ms.rem_euclid(ms_per_day);
    FUNDING_SETTLEMENT_HOURS
        .iter()
        .any(|h| into_day == i64::from(*h) * 60 * MINUTE_MS)
}

/// Validate that a Play's three declared roles respect `low_tf <= med_tf <= high_tf`.
pub fn validate_hierarchy(low: Timeframe, med: Timeframe, high: Timeframe) -> EngineResult<()> {
    use crate::error::PlayError;
    if low.tf_minutes() <= med.tf_minutes() && med.tf_minutes() <= high.tf_minutes() {
        Ok(())
    } else {
        Err(PlayError::TimeframeHierarchy {
            low: low.tf_minutes(),
            med: med.tf_minutes(),
            high: high.tf_minutes(),
        }
        .into())
    }
}

impl fmt::Debug for BarRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.ts_open, self.ts_close)
    }
}

/// A closed half-open millisecond range `[ts_open, ts_close)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BarRange {
    pub ts_open: i64,
    pub ts_close: i64,
}

impl BarRange {
    pub fn for_bar(ts_open: i64, tf: Timeframe) -> Self {
        Self {
            ts_open,
            ts_close: ts_open + i64::from(tf.tf_minutes()) * MINUTE_MS,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.ts_open && ts_ms < self.ts_close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tf_minutes_matches_all_variants() {
        assert_eq!(Timeframe::M1.tf_minutes(), 1);
        assert_eq!(Timeframe::H1.tf_minutes(), 60);
        assert_eq!(Timeframe::D1.tf_minutes(), 1440);
    }

    #[test]
    fn floor_and_ceil_roundtrip_on_boundary() {
        let tf = Timeframe::M15;
        let step = i64::from(tf.tf_minutes()) * MINUTE_MS;
        let open = 10 * step;
        assert_eq!(floor_to_bar_boundary(open, tf), open);
        assert_eq!(floor_to_bar_boundary(open + 1, tf), open);
        assert_eq!(ceil_to_tf_close(open, tf), open + step);
    }

    #[test]
    fn funding_settlement_hours() {
        let day0 = 0i64;
        assert!(is_funding_settlement(day0));
        assert!(is_funding_settlement(day0 + 8 * 3600 * 1000));
        assert!(is_funding_settlement(day0 + 16 * 3600 * 1000));
        assert!(!is_funding_settlement(day0 + 1 * 3600 * 1000));
    }

    #[test]
    fn hierarchy_rejects_inverted_roles() {
        assert!(validate_hierarchy(Timeframe::H1, Timeframe::M15, Timeframe::D1).is_err());
        assert!(validate_hierarchy(Timeframe::M15, Timeframe::H1, Timeframe::D1).is_ok());
    }
}
