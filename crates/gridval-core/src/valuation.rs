//! Valuation results and portfolio summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::GeoContext;
use crate::scores::RunId;
use crate::units::Megawatts;
use crate::{AssetId, GeoPoint, ZoneCode};

/// Value tier on `value_per_kw_year`. Thresholds live in
/// [`crate::config::TierThresholds`], the one table every consumer classifies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTier {
    Low,
    Moderate,
    High,
    Premium,
}

impl ValueTier {
    pub const ALL: [ValueTier; 4] = [
        ValueTier::Premium,
        ValueTier::High,
        ValueTier::Moderate,
        ValueTier::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueTier::Low => "low",
            ValueTier::Moderate => "moderate",
            ValueTier::High => "high",
            ValueTier::Premium => "premium",
        }
    }
}

impl fmt::Display for ValueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known DER location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerAsset {
    pub asset_id: AssetId,
    pub location: GeoPoint,
    pub der_type: String,
    pub capacity_mw: Megawatts,
}

/// Per-component contributions. Serialises as a mapping with exactly these keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueBreakdown {
    /// $/year
    pub zone_congestion_value: f64,
    /// Dimensionless factor applied to the zone value
    pub pnode_multiplier: f64,
    /// $/year
    pub substation_loading_value: f64,
    /// $/year
    pub feeder_capacity_value: f64,
}

impl ValueBreakdown {
    pub fn total(&self) -> f64 {
        self.zone_congestion_value * self.pnode_multiplier
            + self.substation_loading_value
            + self.feeder_capacity_value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub geo_context: GeoContext,
    pub der_type: String,
    pub capacity_mw: Megawatts,
    pub pipeline_run_id: RunId,
    pub value_breakdown: ValueBreakdown,
    pub total_constraint_relief_value: f64,
    pub coincidence_factor: f64,
    pub effective_capacity_mw: Megawatts,
    pub value_per_kw_year: f64,
    pub value_tier: ValueTier,
    /// Degraded-valuation notes (missing scores and the like)
    pub warnings: Vec<String>,
}

/// Valuation over a closed, measured interval `[retrospective_start, retrospective_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrospectiveValuation {
    pub asset_id: AssetId,
    pub geo_context: GeoContext,
    pub der_type: String,
    pub capacity_mw: Megawatts,
    pub pipeline_run_id: RunId,
    pub retrospective_start: DateTime<Utc>,
    pub retrospective_end: DateTime<Utc>,
    pub interval_hours: u32,
    pub constrained_hours: u32,
    /// Energy the asset would have delivered during constrained hours
    pub actual_savings_mwh: f64,
    pub value_breakdown: ValueBreakdown,
    /// Dollars attributable to the interval (annual value prorated by hours)
    pub total_constraint_relief_value: f64,
    pub coincidence_factor: f64,
    pub effective_capacity_mw: Megawatts,
    /// Annualised
    pub value_per_kw_year: f64,
    pub value_tier: ValueTier,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRanking {
    pub zone_code: ZoneCode,
    pub avg_constraint_value: f64,
    pub der_count: usize,
}

/// Per-ISO roll-up for cross-system comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub iso_code: String,
    pub pipeline_run_id: Option<RunId>,
    pub total_zones: usize,
    pub constrained_zones: usize,
    pub total_substations: usize,
    pub overloaded_substations: usize,
    pub total_der_locations: usize,
    pub total_portfolio_value: f64,
    pub avg_value_per_kw_year: f64,
    /// Always carries all four tiers
    pub tier_distribution: BTreeMap<ValueTier, usize>,
    pub top_zones: Vec<ZoneRanking>,
}

impl PortfolioSummary {
    /// Valid summary with every count at zero.
    pub fn empty(iso_code: impl Into<String>) -> Self {
        Self {
            iso_code: iso_code.into(),
            pipeline_run_id: None,
            total_zones: 0,
            constrained_zones: 0,
            total_substations: 0,
            overloaded_substations: 0,
            total_der_locations: 0,
            total_portfolio_value: 0.0,
            avg_value_per_kw_year: 0.0,
            tier_distribution: ValueTier::ALL.iter().map(|t| (*t, 0)).collect(),
            top_zones: Vec::new(),
        }
    }
}
