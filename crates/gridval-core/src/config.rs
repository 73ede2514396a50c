//! Engine configuration.
//!
//! [`EngineConfig`] is loaded once at startup from `~/.gridval/config.toml`
//! (or an explicit path) and validated before any request is served. An invalid
//! configuration is a startup failure, never a per-request one.
//!
//! Every section uses `#[serde(default)]`, so a partial file only overrides what
//! it names:
//!
//! ```toml
//! [resolver]
//! substation_cutoff_km = 3.0
//!
//! [resolver.feeder_cutoff_overrides]
//! "PECO Energy" = 2.5
//!
//! [tiers]
//! premium = 175.0
//!
//! [der_types.storage]
//! weight = 1.0
//! availability = [0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9,
//!                 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.9]
//! ```
//!
//! The tier table in `[tiers]` is the single source for value-tier
//! classification. The valuation engine, the portfolio aggregator and the CLI
//! all classify through [`TierThresholds::classify`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{GridvalError, GridvalResult};
use crate::scores::{ConstraintTier, HOURS_PER_DAY};
use crate::valuation::ValueTier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub scoring: ScoringConfig,
    pub valuation: ValuationConfig,
    pub tiers: TierThresholds,
    pub portfolio: PortfolioConfig,
    /// DER type name -> relevance weight and availability profile. Entries in
    /// a file are merged over the built-in types.
    #[serde(deserialize_with = "merge_der_types")]
    pub der_types: BTreeMap<String, DerProfile>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            scoring: ScoringConfig::default(),
            valuation: ValuationConfig::default(),
            tiers: TierThresholds::default(),
            portfolio: PortfolioConfig::default(),
            der_types: default_der_types(),
        }
    }
}

/// Nearest-neighbour cutoffs for the hierarchy resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub substation_cutoff_km: f64,
    pub pnode_cutoff_km: f64,
    /// Feeder cutoff when the utility has no override
    pub feeder_cutoff_km: f64,
    /// Utility name -> feeder cutoff in km
    pub feeder_cutoff_overrides: BTreeMap<String, f64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            substation_cutoff_km: 5.0,
            pnode_cutoff_km: 5.0,
            feeder_cutoff_km: 5.0,
            feeder_cutoff_overrides: BTreeMap::new(),
        }
    }
}

impl ResolverConfig {
    pub fn feeder_cutoff_for(&self, utility: &str) -> f64 {
        self.feeder_cutoff_overrides
            .get(utility)
            .copied()
            .unwrap_or(self.feeder_cutoff_km)
    }

    pub fn with_substation_cutoff_km(mut self, km: f64) -> Self {
        self.substation_cutoff_km = km;
        self
    }

    pub fn with_feeder_cutoff_override(mut self, utility: impl Into<String>, km: f64) -> Self {
        self.feeder_cutoff_overrides.insert(utility.into(), km);
        self
    }
}

/// Per-run scoring parameters. Recorded on each pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub congestion_weight: f64,
    pub loading_weight: f64,
    /// |congestion component| at or above this counts as a binding hour ($/MWh)
    pub binding_congestion_usd_per_mwh: f64,
    /// Loading at or above this counts as a binding hour (% of rating)
    pub loading_threshold_pct: f64,
    pub critical_threshold: f64,
    pub elevated_threshold: f64,
    pub moderate_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            congestion_weight: 0.6,
            loading_weight: 0.4,
            binding_congestion_usd_per_mwh: 1.0,
            loading_threshold_pct: 80.0,
            critical_threshold: 0.75,
            elevated_threshold: 0.5,
            moderate_threshold: 0.25,
        }
    }
}

impl ScoringConfig {
    pub fn with_weights(mut self, congestion: f64, loading: f64) -> Self {
        self.congestion_weight = congestion;
        self.loading_weight = loading;
        self
    }

    /// Weighted blend, renormalised over the inputs that are present.
    pub fn combine(&self, congestion: Option<f64>, loading: Option<f64>) -> Option<f64> {
        let mut weighted = 0.0;
        let mut weight = 0.0;
        if let Some(c) = congestion {
            weighted += self.congestion_weight * c;
            weight += self.congestion_weight;
        }
        if let Some(l) = loading {
            weighted += self.loading_weight * l;
            weight += self.loading_weight;
        }
        if weight > 0.0 {
            Some((weighted / weight).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    pub fn tier_for(&self, combined: Option<f64>) -> ConstraintTier {
        match combined {
            None => ConstraintTier::Unscored,
            Some(s) if s >= self.critical_threshold => ConstraintTier::Critical,
            Some(s) if s >= self.elevated_threshold => ConstraintTier::Elevated,
            Some(s) if s >= self.moderate_threshold => ConstraintTier::Moderate,
            Some(_) => ConstraintTier::Low,
        }
    }
}

/// Dollar rates and thresholds for the valuation components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
    /// $/MW-year of effective capacity at combined score 1.0 and DER weight 1.0
    pub zone_congestion_rate_usd_per_mw_year: f64,
    pub substation_loading_rate_usd_per_mw_year: f64,
    pub feeder_capacity_rate_usd_per_mw_year: f64,
    /// Substation value is nonzero only above this peak loading (% of rating)
    pub loading_threshold_pct: f64,
    /// Floor on remaining headroom so scarcity stays finite at 100 % loading
    pub min_headroom_pct: f64,
    /// Feeder value is nonzero only below this remaining hosting capacity (MW)
    pub hosting_scarcity_threshold_mw: f64,
    pub pnode_multiplier_min: f64,
    pub pnode_multiplier_max: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            zone_congestion_rate_usd_per_mw_year: 200_000.0,
            substation_loading_rate_usd_per_mw_year: 50_000.0,
            feeder_capacity_rate_usd_per_mw_year: 40_000.0,
            loading_threshold_pct: 80.0,
            min_headroom_pct: 1.0,
            hosting_scarcity_threshold_mw: 2.0,
            pnode_multiplier_min: 0.25,
            pnode_multiplier_max: 4.0,
        }
    }
}

/// Value-tier thresholds on $/kW-year. A value equal to a threshold belongs to
/// the higher tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub premium: f64,
    pub high: f64,
    pub moderate: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            premium: 150.0,
            high: 80.0,
            moderate: 30.0,
        }
    }
}

impl TierThresholds {
    pub fn classify(&self, value_per_kw_year: f64) -> ValueTier {
        if value_per_kw_year >= self.premium {
            ValueTier::Premium
        } else if value_per_kw_year >= self.high {
            ValueTier::High
        } else if value_per_kw_year >= self.moderate {
            ValueTier::Moderate
        } else {
            ValueTier::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Number of zones reported in `top_zones`
    pub top_zones: usize,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self { top_zones: 5 }
    }
}

/// How much a DER type relieves congestion and when it is producing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerProfile {
    /// Relevance of this DER type to congestion relief, in [0, 1]
    pub weight: f64,
    /// Expected availability by hour of day (24 entries in [0, 1])
    pub availability: Vec<f64>,
}

impl DerProfile {
    pub fn new(weight: f64, availability: Vec<f64>) -> Self {
        Self {
            weight,
            availability,
        }
    }

    pub fn flat(weight: f64, availability: f64) -> Self {
        Self::new(weight, vec![availability; HOURS_PER_DAY])
    }

    pub fn availability_at(&self, hour: usize) -> f64 {
        self.availability
            .get(hour % HOURS_PER_DAY)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn mean_availability(&self) -> f64 {
        if self.availability.is_empty() {
            return 0.0;
        }
        self.availability.iter().sum::<f64>() / self.availability.len() as f64
    }

    /// Share of constrained hours during which this DER type is producing.
    /// Falls back to mean availability when there are no constrained hours.
    pub fn coincidence(&self, constrained_hour_profile: &[u32; HOURS_PER_DAY]) -> f64 {
        let total: u32 = constrained_hour_profile.iter().sum();
        if total == 0 {
            return self.mean_availability().clamp(0.0, 1.0);
        }
        let covered: f64 = constrained_hour_profile
            .iter()
            .enumerate()
            .map(|(hour, &count)| count as f64 * self.availability_at(hour))
            .sum();
        (covered / total as f64).clamp(0.0, 1.0)
    }

    fn validate(&self, name: &str) -> GridvalResult<()> {
        if !(0.0..=1.0).contains(&self.weight) {
            return Err(GridvalError::Config(format!(
                "der_types.{name}.weight must be within [0, 1], got {}",
                self.weight
            )));
        }
        if self.availability.len() != HOURS_PER_DAY {
            return Err(GridvalError::Config(format!(
                "der_types.{name}.availability must have {HOURS_PER_DAY} entries, got {}",
                self.availability.len()
            )));
        }
        if let Some(bad) = self
            .availability
            .iter()
            .find(|a| !(0.0..=1.0).contains(*a))
        {
            return Err(GridvalError::Config(format!(
                "der_types.{name}.availability values must be within [0, 1], got {bad}"
            )));
        }
        Ok(())
    }
}

fn default_der_types() -> BTreeMap<String, DerProfile> {
    let solar = vec![
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.05, 0.2, 0.4, 0.6, 0.75, 0.85, 0.9, 0.85, 0.75, 0.6, 0.4,
        0.2, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0,
    ];
    let demand_response = (0..HOURS_PER_DAY)
        .map(|h| if (12..=20).contains(&h) { 0.8 } else { 0.2 })
        .collect();

    let mut profiles = BTreeMap::new();
    profiles.insert("solar".to_string(), DerProfile::new(0.8, solar));
    profiles.insert("storage".to_string(), DerProfile::flat(1.0, 0.9));
    profiles.insert("wind".to_string(), DerProfile::flat(0.6, 0.35));
    profiles.insert(
        "demand_response".to_string(),
        DerProfile::new(0.9, demand_response),
    );
    profiles
}

fn merge_der_types<'de, D>(deserializer: D) -> Result<BTreeMap<String, DerProfile>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, DerProfile>::deserialize(deserializer)?;
    let mut profiles = default_der_types();
    profiles.extend(overrides);
    Ok(profiles)
}

fn require_positive(name: &str, value: f64) -> GridvalResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GridvalError::Config(format!("{name} must be > 0, got {value}")))
    }
}

fn require_non_negative(name: &str, value: f64) -> GridvalResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GridvalError::Config(format!("{name} must be >= 0, got {value}")))
    }
}

fn require_descending(names: [&str; 3], values: [f64; 3]) -> GridvalResult<()> {
    if values[0] > values[1] && values[1] > values[2] {
        Ok(())
    } else {
        Err(GridvalError::Config(format!(
            "{} > {} > {} must hold, got {} / {} / {}",
            names[0], names[1], names[2], values[0], values[1], values[2]
        )))
    }
}

impl EngineConfig {
    /// Default config directory (`~/.gridval`).
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".gridval"))
    }

    /// Default config file path (`~/.gridval/config.toml`).
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Load and validate a config file.
    pub fn load_from(path: &Path) -> GridvalResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            GridvalError::Config(format!("reading config '{}': {e}", path.display()))
        })?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit path, else the default location if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> GridvalResult<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }
        match Self::config_path() {
            Some(default_path) if default_path.exists() => Self::load_from(&default_path),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> GridvalResult<String> {
        toml::to_string_pretty(self).map_err(|e| GridvalError::Config(e.to_string()))
    }

    pub fn der_profile(&self, der_type: &str) -> GridvalResult<&DerProfile> {
        self.der_types
            .get(der_type)
            .ok_or_else(|| GridvalError::UnsupportedDerType(der_type.to_string()))
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_der_type(mut self, name: impl Into<String>, profile: DerProfile) -> Self {
        self.der_types.insert(name.into(), profile);
        self
    }

    /// Reject inconsistent thresholds and weights.
    pub fn validate(&self) -> GridvalResult<()> {
        let r = &self.resolver;
        require_positive("resolver.substation_cutoff_km", r.substation_cutoff_km)?;
        require_positive("resolver.pnode_cutoff_km", r.pnode_cutoff_km)?;
        require_positive("resolver.feeder_cutoff_km", r.feeder_cutoff_km)?;
        for (utility, km) in &r.feeder_cutoff_overrides {
            require_positive(&format!("resolver.feeder_cutoff_overrides.{utility}"), *km)?;
        }

        let s = &self.scoring;
        require_non_negative("scoring.congestion_weight", s.congestion_weight)?;
        require_non_negative("scoring.loading_weight", s.loading_weight)?;
        if s.congestion_weight + s.loading_weight <= 0.0 {
            return Err(GridvalError::Config(
                "scoring weights must sum to > 0".to_string(),
            ));
        }
        require_non_negative(
            "scoring.binding_congestion_usd_per_mwh",
            s.binding_congestion_usd_per_mwh,
        )?;
        require_positive("scoring.loading_threshold_pct", s.loading_threshold_pct)?;
        require_descending(
            [
                "scoring.critical_threshold",
                "scoring.elevated_threshold",
                "scoring.moderate_threshold",
            ],
            [s.critical_threshold, s.elevated_threshold, s.moderate_threshold],
        )?;
        if s.critical_threshold > 1.0 || s.moderate_threshold < 0.0 {
            return Err(GridvalError::Config(
                "scoring tier thresholds must lie within [0, 1]".to_string(),
            ));
        }

        let v = &self.valuation;
        require_non_negative(
            "valuation.zone_congestion_rate_usd_per_mw_year",
            v.zone_congestion_rate_usd_per_mw_year,
        )?;
        require_non_negative(
            "valuation.substation_loading_rate_usd_per_mw_year",
            v.substation_loading_rate_usd_per_mw_year,
        )?;
        require_non_negative(
            "valuation.feeder_capacity_rate_usd_per_mw_year",
            v.feeder_capacity_rate_usd_per_mw_year,
        )?;
        require_positive("valuation.loading_threshold_pct", v.loading_threshold_pct)?;
        require_positive("valuation.min_headroom_pct", v.min_headroom_pct)?;
        require_positive(
            "valuation.hosting_scarcity_threshold_mw",
            v.hosting_scarcity_threshold_mw,
        )?;
        require_positive("valuation.pnode_multiplier_min", v.pnode_multiplier_min)?;
        if v.pnode_multiplier_max < 1.0 || v.pnode_multiplier_min > 1.0 {
            return Err(GridvalError::Config(
                "valuation pnode multiplier bounds must bracket 1.0".to_string(),
            ));
        }

        let t = &self.tiers;
        require_non_negative("tiers.moderate", t.moderate)?;
        require_descending(
            ["tiers.premium", "tiers.high", "tiers.moderate"],
            [t.premium, t.high, t.moderate],
        )?;

        if self.portfolio.top_zones == 0 {
            return Err(GridvalError::Config(
                "portfolio.top_zones must be >= 1".to_string(),
            ));
        }

        if self.der_types.is_empty() {
            return Err(GridvalError::Config(
                "at least one DER type must be configured".to_string(),
            ));
        }
        for (name, profile) in &self.der_types {
            profile.validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn tier_boundaries_are_strict() {
        let tiers = TierThresholds::default();
        assert_eq!(tiers.classify(150.0), ValueTier::Premium);
        assert_eq!(tiers.classify(149.999), ValueTier::High);
        assert_eq!(tiers.classify(80.0), ValueTier::High);
        assert_eq!(tiers.classify(79.999), ValueTier::Moderate);
        assert_eq!(tiers.classify(30.0), ValueTier::Moderate);
        assert_eq!(tiers.classify(0.0), ValueTier::Low);
    }

    #[test]
    fn combine_renormalises_missing_inputs() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.combine(None, None), None);
        assert_eq!(scoring.combine(Some(0.5), None), Some(0.5));
        let both = scoring.combine(Some(1.0), Some(0.0)).unwrap();
        assert!((both - 0.6).abs() < 1e-12);
    }

    #[test]
    fn constraint_tiers_bucket_combined_score() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.tier_for(Some(0.9)), ConstraintTier::Critical);
        assert_eq!(scoring.tier_for(Some(0.75)), ConstraintTier::Critical);
        assert_eq!(scoring.tier_for(Some(0.5)), ConstraintTier::Elevated);
        assert_eq!(scoring.tier_for(Some(0.3)), ConstraintTier::Moderate);
        assert_eq!(scoring.tier_for(Some(0.1)), ConstraintTier::Low);
        assert_eq!(scoring.tier_for(None), ConstraintTier::Unscored);
    }

    #[test]
    fn coincidence_weights_constrained_hours() {
        let solar = EngineConfig::default().der_types["solar"].clone();
        let mut night = [0u32; HOURS_PER_DAY];
        night[2] = 10;
        assert_eq!(solar.coincidence(&night), 0.0);

        let mut noon = [0u32; HOURS_PER_DAY];
        noon[12] = 4;
        assert!((solar.coincidence(&noon) - 0.9).abs() < 1e-12);

        let empty = [0u32; HOURS_PER_DAY];
        assert!((solar.coincidence(&empty) - solar.mean_availability()).abs() < 1e-12);
    }

    #[test]
    fn rejects_inconsistent_tiers() {
        let mut config = EngineConfig::default();
        config.tiers.high = 200.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tiers.premium"));
    }

    #[test]
    fn rejects_zero_weights_and_bad_profiles() {
        let config = EngineConfig::default()
            .with_scoring(ScoringConfig::default().with_weights(0.0, 0.0));
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_der_type("ev", DerProfile::new(0.5, vec![1.0]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[resolver]\nsubstation_cutoff_km = 3.0\n\n[resolver.feeder_cutoff_overrides]\n\"PECO Energy\" = 2.5\n\n[tiers]\npremium = 175.0"
        )
        .unwrap();
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.resolver.substation_cutoff_km, 3.0);
        assert_eq!(config.resolver.feeder_cutoff_for("PECO Energy"), 2.5);
        assert_eq!(config.resolver.feeder_cutoff_for("PPL"), 5.0);
        assert_eq!(config.tiers.premium, 175.0);
        assert_eq!(config.tiers.high, 80.0);
        assert!(config.der_types.contains_key("solar"));
    }

    #[test]
    fn der_type_override_keeps_other_builtins() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[der_types.storage]\nweight = 0.5\navailability = [{}]",
            vec!["1.0"; HOURS_PER_DAY].join(", ")
        )
        .unwrap();
        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.der_types["storage"], DerProfile::flat(0.5, 1.0));
        for name in ["solar", "wind", "demand_response"] {
            assert!(config.der_profile(name).is_ok(), "{name} dropped");
        }
    }

    #[test]
    fn load_rejects_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[portfolio]\ntop_zones = 0").unwrap();
        let err = EngineConfig::load_from(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn unknown_der_type_is_reported() {
        let config = EngineConfig::default();
        assert!(matches!(
            config.der_profile("fusion"),
            Err(GridvalError::UnsupportedDerType(_))
        ));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
