//! Incremental market-structure detectors (§4.C): swing pivots, trend waves,
//! BOS/CHoCH market structure, fibonacci levels, zones, derived K-slot
//! zones, and rolling windows. Every detector here is cleanly `reset()`-able
//! for re-runs within one process and keyed by a `StructureKey` the DSL
//! compiler resolves at load time (§9 design notes: `Vec<Detector>` in
//! topological order, borrowing only previously-computed state).

pub mod derived_zone;
pub mod fibonacci;
pub mod market_structure;
pub mod rolling_window;
pub mod swing;
pub mod trend;
pub mod zone;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{EngineResult, PlayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum StructureKind {
    Swing,
    Trend,
    MarketStructure,
    Fibonacci,
    Zone,
    DerivedZone,
    RollingWindow,
}

impl StructureKind {
    pub fn from_name(name: &str) -> EngineResult<Self> {
        name.parse::<StructureKind>().map_err(|_| PlayError::UnknownStructure(name.to_string()).into())
    }
}

/// Resolved output of a single structure at a single bar; namespace tags
/// exist so the snapshot layer can dispatch `structure.{key}.{field}` (and
/// `structure.{key}.zone[N].field`) without re-discovering which detector
/// variant produced it.
#[derive(Debug, Clone)]
pub enum StructureOutput {
    Swing(swing::SwingOutput),
    Trend(trend::TrendOutput),
    MarketStructure(market_structure::MarketStructureOutput),
    Fibonacci(fibonacci::FibonacciOutput),
    Zone(zone::ZoneOutput),
    DerivedZone(derived_zone::DerivedZoneOutput),
    RollingWindow(rolling_window::RollingWindowOutput),
}

impl StructureOutput {
    pub fn field(&self, name: &str) -> Option<f64> {
        match self {
            StructureOutput::Swing(o) => o.get(name),
            StructureOutput::Trend(o) => o.get(name),
            StructureOutput::MarketStructure(o) => o.get(name),
            StructureOutput::Fibonacci(o) => o.get(name),
            StructureOutput::Zone(o) => o.get(name),
            StructureOutput::DerivedZone(o) => o.get(name),
            StructureOutput::RollingWindow(o) => o.get(name),
        }
    }

    pub fn fib_level(&self, ratio: f64) -> Option<f64> {
        match self {
            StructureOutput::Fibonacci(o) => o.level(ratio),
            _ => None,
        }
    }

    pub fn zone_slot_field(&self, slot: usize, field: &str) -> Option<f64> {
        match self {
            StructureOutput::DerivedZone(o) => o.slot_field(slot, field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_kind_name_roundtrips() {
        for k in [StructureKind::Swing, StructureKind::DerivedZone, StructureKind::RollingWindow] {
            let s = k.to_string();
            assert_eq!(StructureKind::from_name(&s).unwrap(), k);
        }
    }
}
