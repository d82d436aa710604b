//! Canonical Bar (§3.1): an immutable closed OHLCV record. Timestamps are
//! UTC millisecond-granular integers — the engine never observes a partial
//! or currently-forming bar.

use serde::{Deserialize, Serialize};

use crate::domain::{CandleDirection, Price, Volume};
use crate::error::{DataError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts_open: i64,
    pub ts_close: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
}

impl Bar {
    /// Validates the invariants from §3.1: `low <= min(open,close) <= max(open,close) <= high`,
    /// non-negative prices/volume, `ts_close = ts_open + duration`.
    pub fn validate(&self) -> EngineResult<()> {
        let lo = self.open.0.min(self.close.0);
        let hi = self.open.0.max(self.close.0);
        if self.low.0 < 0.0 || self.high.0 < 0.0 || self.open.0 < 0.0 || self.close.0 < 0.0 {
            return Err(DataError::InvalidSymbol("negative price field".into()).into());
        }
        if self.volume.0 < 0.0 {
            return Err(DataError::InvalidSymbol("negative volume".into()).into());
        }
        if !(self.low.0 <= lo && lo <= hi && hi <= self.high.0) {
            return Err(DataError::InvalidSymbol(format!(
                "OHLC ordering violated: low={} open={} close={} high={}",
                self.low.0, self.open.0, self.close.0, self.high.0
            ))
            .into());
        }
        if self.ts_close <= self.ts_open {
            return Err(DataError::InvalidSymbol(format!(
                "ts_close {} must be after ts_open {}",
                self.ts_close, self.ts_open
            ))
            .into());
        }
        Ok(())
    }

    pub fn direction(&self) -> CandleDirection {
        if self.close.0 > self.open.0 {
            CandleDirection::Bullish
        } else if self.close.0 < self.open.0 {
            CandleDirection::Bearish
        } else {
            CandleDirection::Doji
        }
    }

    pub fn hl2(&self) -> f64 {
        (self.high.0 + self.low.0) / 2.0
    }

    pub fn hlc3(&self) -> f64 {
        (self.high.0 + self.low.0 + self.close.0) / 3.0
    }

    pub fn ohlc4(&self) -> f64 {
        (self.open.0 + self.high.0 + self.low.0 + self.close.0) / 4.0
    }

    /// True if `price` falls within `[low, high]`, used by TP/SL/limit matching.
    pub fn price_reached(&self, price: f64) -> bool {
        self.low.0 <= price && price <= self.high.0
    }
}

/// A Feature's declared input source (§3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
}

impl InputSource {
    pub fn extract(self, bar: &Bar) -> f64 {
        match self {
            InputSource::Open => bar.open.0,
            InputSource::High => bar.high.0,
            InputSource::Low => bar.low.0,
            InputSource::Close => bar.close.0,
            InputSource::Volume => bar.volume.0,
            InputSource::Hl2 => bar.hl2(),
            InputSource::Hlc3 => bar.hlc3(),
            InputSource::Ohlc4 => bar.ohlc4(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_bar() -> Bar {
        Bar {
            ts_open: 0,
            ts_close: 900_000,
            open: Price(100.0),
            high: Price(110.0),
            low: Price(95.0),
            close: Price(105.0),
            volume: Volume(10.0),
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(ok_bar().validate().is_ok());
    }

    #[test]
    fn rejects_high_below_close() {
        let mut b = ok_bar();
        b.high = Price(100.5);
        assert!(b.validate().is_err());
    }

    #[test]
    fn rejects_zero_duration() {
        let mut b = ok_bar();
        b.ts_close = b.ts_open;
        assert!(b.validate().is_err());
    }

    #[test]
    fn direction_matches_body() {
        assert_eq!(ok_bar().direction(), CandleDirection::Bullish);
    }
}
