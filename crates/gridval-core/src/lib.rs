//! # gridval-core: Grid Hierarchy and Valuation Data Model
//!
//! Provides the data structures shared by every gridval crate: the grid entity
//! hierarchy, resolution results, versioned congestion scores, valuation results
//! and the engine configuration.
//!
//! ## Grid Hierarchy
//!
//! Entities are loaded as flat, independently owned collections:
//!
//! ```text
//! ISO ──► Zone ──► Substation ──► Feeder
//!          └────► PricingNode
//! ```
//!
//! Parent links are identifiers resolved through an [`EntitySet`] index, never
//! owning pointers. A substation, feeder or pricing node whose source data lacks
//! the parent link simply carries `None`.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridval_core::*;
//!
//! let point = GeoPoint::validated(39.95, -75.16).unwrap();
//! let sub = Substation::new(SubstationId::new("PECO-0142"))
//!     .with_zone(ZoneCode::new("PECO"))
//!     .with_location(GeoPoint::new(39.958, -75.17));
//!
//! assert_eq!(sub.zone.as_ref().map(|z| z.as_str()), Some("PECO"));
//! assert!(point.lat > 39.0);
//! ```
//!
//! ## Modules
//!
//! - [`entities`] - Zones, substations, feeders, pricing nodes and the [`EntitySet`]
//! - [`context`] - [`GeoContext`] produced by the hierarchy resolver
//! - [`scores`] - Append-only [`ScoreRecord`] generations keyed by pipeline run
//! - [`valuation`] - Valuation results and portfolio summaries
//! - [`config`] - [`EngineConfig`], validated once at startup
//! - [`diagnostics`] - Load-time warnings and errors
//! - [`units`] - Unit newtypes for capacity and distance

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod entities;
pub mod error;
pub mod scores;
pub mod units;
pub mod valuation;

pub use config::{
    DerProfile, EngineConfig, PortfolioConfig, ResolverConfig, ScoringConfig, TierThresholds,
    ValuationConfig,
};
pub use context::{Confidence, GeoContext, ResolutionDepth};
pub use diagnostics::{DiagnosticIssue, Diagnostics, LoadDiagnostics, LoadStats, Severity};
pub use entities::{EntitySet, Feeder, GridEntity, IsoRegion, PricingNode, Substation, Zone};
pub use error::{ErrorKind, GridvalError, GridvalResult};
pub use scores::{
    ConstraintTier, GridLevel, PipelineRun, RunId, RunStatus, ScoreRecord, HOURS_PER_DAY,
};
pub use units::{Kilometers, Megawatts};
pub use valuation::{
    DerAsset, PortfolioSummary, RetrospectiveValuation, ValuationResult, ValueBreakdown,
    ValueTier, ZoneRanking,
};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }
    };
}

string_id!(
    /// Pricing/congestion zone code (e.g. `PECO` within PJM).
    ZoneCode
);
string_id!(SubstationId);
string_id!(FeederId);
string_id!(
    /// Pricing node identifier as published by the ISO.
    PnodeId
);
string_id!(
    /// Identifier of a known DER location in the asset registry.
    AssetId
);

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point without range checks (entity data is validated on load).
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a point from request input, rejecting out-of-range coordinates.
    pub fn validated(lat: f64, lon: f64) -> GridvalResult<Self> {
        let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
        let lon_ok = lon.is_finite() && (-180.0..=180.0).contains(&lon);
        if lat_ok && lon_ok {
            Ok(Self { lat, lon })
        } else {
            Err(GridvalError::InvalidCoordinate { lat, lon })
        }
    }

    /// Convert to a `geo` point (x = lon, y = lat).
    #[inline]
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_rejects_out_of_range() {
        assert!(GeoPoint::validated(90.0, 180.0).is_ok());
        assert!(GeoPoint::validated(-90.0, -180.0).is_ok());
        assert!(matches!(
            GeoPoint::validated(90.01, 0.0),
            Err(GridvalError::InvalidCoordinate { .. })
        ));
        assert!(GeoPoint::validated(0.0, -180.5).is_err());
        assert!(GeoPoint::validated(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = ZoneCode::new("PECO");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"PECO\"");
        assert_eq!(id.to_string(), "PECO");
    }
}
