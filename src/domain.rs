//! Core newtype domain primitives shared across indicators, structures, the
//! exchange and the DSL. Grid-snapping follows the same tick-size/tick-value
//! pattern used for every asset class elsewhere in this codebase, narrowed
//! here to USDT-margined perpetuals (the only margin mode this engine
//! supports).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{impl_abs_primitive, impl_add_sub_mul_div_primitive, impl_from_primitive, impl_neg_primitive};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(pub f64);
impl_from_primitive!(Price, f64);
impl_add_sub_mul_div_primitive!(Price, f64);
impl_neg_primitive!(Price, f64);
impl_abs_primitive!(Price, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Tick(pub i64);
impl_from_primitive!(Tick, i64);
impl_add_sub_mul_div_primitive!(Tick, i64);
impl_neg_primitive!(Tick, i64);
impl_abs_primitive!(Tick, i64);

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Quantity(pub f64);
impl_from_primitive!(Quantity, f64);
impl_add_sub_mul_div_primitive!(Quantity, f64);
impl_neg_primitive!(Quantity, f64);
impl_abs_primitive!(Quantity, f64);

pub type Volume = Quantity;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Usdt(pub f64);
impl_from_primitive!(Usdt, f64);
impl_add_sub_mul_div_primitive!(Usdt, f64);
impl_neg_primitive!(Usdt, f64);
impl_abs_primitive!(Usdt, f64);

/// Signed directional enum for a closed candle body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
pub enum CandleDirection {
    Bullish,
    Bearish,
    Doji,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn sign(self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            TradeSide::Long => TradeSide::Short,
            TradeSide::Short => TradeSide::Long,
        }
    }
}

/// USDT-margined perpetual contract identity. Every perp in this engine is
/// quoted in USDT; the `base` asset (e.g. `BTC`) and an exchange-declared
/// tick size/value are all that's needed for grid snapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerpSymbol {
    pub base: &'static str,
    pub tick_size: u64, // stored as integer micro-units to keep Eq/Hash exact
    pub tick_value_usd_micros: u64,
}

impl PerpSymbol {
    pub const fn new(base: &'static str, tick_size: f64, tick_value_usd: f64) -> Self {
        Self {
            base,
            tick_size: (tick_size * 1_000_000.0) as u64,
            tick_value_usd_micros: (tick_value_usd * 1_000_000.0) as u64,
        }
    }

    pub const BTC_USDT: PerpSymbol = PerpSymbol::new("BTC", 0.1, 0.1);
    pub const ETH_USDT: PerpSymbol = PerpSymbol::new("ETH", 0.01, 0.01);

    pub fn tick_size(&self) -> f64 {
        self.tick_size as f64 / 1_000_000.0
    }

    pub fn tick_value_usd(&self) -> f64 {
        self.tick_value_usd_micros as f64 / 1_000_000.0
    }
}

/// Snap-to-grid capability, eliminating floating-point PnL drift: every
/// price distance used in PnL calculation is rounded to the exchange's tick
/// grid before being converted back to USD.
pub trait GridSnap {
    fn tick_size(&self) -> f64;
    fn tick_value_usd(&self) -> f64;

    fn price_to_ticks(&self, price_dist: Price) -> Tick {
        Tick((price_dist.0 / self.tick_size()).round() as i64)
    }

    fn ticks_to_usd(&self, ticks: Tick) -> f64 {
        ticks.0 as f64 * self.tick_value_usd()
    }

    fn snap_price(&self, price: f64) -> f64 {
        let ticks = (price / self.tick_size()).round();
        ticks * self.tick_size()
    }
}

impl GridSnap for PerpSymbol {
    fn tick_size(&self) -> f64 {
        PerpSymbol::tick_size(self)
    }

    fn tick_value_usd(&self) -> f64 {
        PerpSymbol::tick_value_usd(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_snap_eliminates_noise() {
        let btc = PerpSymbol::BTC_USDT;
        let noisy = Price(100_000.049_999_997);
        let snapped = btc.snap_price(noisy.0);
        assert_eq!(snapped, 100_000.0);
    }

    #[test]
    fn ticks_roundtrip_to_usd() {
        let btc = PerpSymbol::BTC_USDT;
        let dist = Price(105_000.0 - 100_000.0);
        let ticks = btc.price_to_ticks(dist);
        assert_eq!(ticks.0, 50_000);
        assert!((btc.ticks_to_usd(ticks) - 5000.0).abs() < 1e-6);
    }
}
