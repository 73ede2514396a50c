//! Resolution result for one coordinate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::units::Kilometers;
use crate::{FeederId, GeoPoint, PnodeId, SubstationId, ZoneCode};

/// Deepest hierarchy level successfully attached. Ordered shallow to deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionDepth {
    Unresolved,
    Iso,
    Zone,
    Substation,
    FeederOrPnode,
}

impl ResolutionDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionDepth::Unresolved => "unresolved",
            ResolutionDepth::Iso => "iso",
            ResolutionDepth::Zone => "zone",
            ResolutionDepth::Substation => "substation",
            ResolutionDepth::FeederOrPnode => "feeder_or_pnode",
        }
    }
}

impl fmt::Display for ResolutionDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid hierarchy attached to one (lat, lon).
///
/// `errors` holds non-fatal resolution warnings in the order the resolver hit
/// them; it is non-empty whenever `resolution_depth` is shallower than
/// [`ResolutionDepth::FeederOrPnode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoContext {
    pub point: GeoPoint,
    pub iso_code: Option<String>,
    pub zone_code: Option<ZoneCode>,
    pub substation_ref: Option<SubstationId>,
    pub substation_distance_km: Option<Kilometers>,
    pub pnode_ref: Option<PnodeId>,
    pub pnode_distance_km: Option<Kilometers>,
    pub feeder_ref: Option<FeederId>,
    pub feeder_distance_km: Option<Kilometers>,
    pub circuit_ref: Option<String>,
    pub resolution_depth: ResolutionDepth,
    pub confidence: Confidence,
    pub errors: Vec<String>,
}

impl GeoContext {
    /// Context with nothing attached.
    pub fn unresolved(point: GeoPoint) -> Self {
        Self {
            point,
            iso_code: None,
            zone_code: None,
            substation_ref: None,
            substation_distance_km: None,
            pnode_ref: None,
            pnode_distance_km: None,
            feeder_ref: None,
            feeder_distance_km: None,
            circuit_ref: None,
            resolution_depth: ResolutionDepth::Unresolved,
            confidence: Confidence::Low,
            errors: Vec::new(),
        }
    }

    /// Deepest level whose reference is non-null.
    pub fn deepest_attached(&self) -> ResolutionDepth {
        if self.feeder_ref.is_some() || self.pnode_ref.is_some() {
            ResolutionDepth::FeederOrPnode
        } else if self.substation_ref.is_some() {
            ResolutionDepth::Substation
        } else if self.zone_code.is_some() {
            ResolutionDepth::Zone
        } else if self.iso_code.is_some() {
            ResolutionDepth::Iso
        } else {
            ResolutionDepth::Unresolved
        }
    }

    /// Structural invariants every resolver output must satisfy.
    pub fn is_consistent(&self) -> bool {
        let depth_ok = self.resolution_depth <= self.deepest_attached();
        let confidence_ok = self.confidence != Confidence::High
            || self.resolution_depth >= ResolutionDepth::Substation;
        let errors_ok = self.resolution_depth == ResolutionDepth::FeederOrPnode
            || !self.errors.is_empty();
        depth_ok && confidence_ok && errors_ok
    }

    /// Stable key over the resolved entities, used for valuation caching.
    pub fn resolved_key(&self) -> String {
        fn part<T: fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map(|v| v.to_string()).unwrap_or_default()
        }
        format!(
            "{}|{}|{}|{}|{}",
            part(&self.iso_code),
            part(&self.zone_code),
            part(&self.substation_ref),
            part(&self.pnode_ref),
            part(&self.feeder_ref)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_ordering_is_shallow_to_deep() {
        assert!(ResolutionDepth::Unresolved < ResolutionDepth::Iso);
        assert!(ResolutionDepth::Zone < ResolutionDepth::Substation);
        assert!(ResolutionDepth::Substation < ResolutionDepth::FeederOrPnode);
    }

    #[test]
    fn unresolved_context_needs_a_reason() {
        let mut ctx = GeoContext::unresolved(GeoPoint::new(0.0, 0.0));
        assert!(!ctx.is_consistent());
        ctx.errors.push("no zone boundary contains point".into());
        assert!(ctx.is_consistent());
    }

    #[test]
    fn high_confidence_requires_substation_depth() {
        let mut ctx = GeoContext::unresolved(GeoPoint::new(39.95, -75.16));
        ctx.zone_code = Some(ZoneCode::new("PECO"));
        ctx.iso_code = Some("PJM".into());
        ctx.resolution_depth = ResolutionDepth::Zone;
        ctx.confidence = Confidence::High;
        ctx.errors.push("no substation within cutoff".into());
        assert!(!ctx.is_consistent());
        ctx.confidence = Confidence::Medium;
        assert!(ctx.is_consistent());
    }

    #[test]
    fn serializes_enums_in_snake_case() {
        let json = serde_json::to_string(&ResolutionDepth::FeederOrPnode).unwrap();
        assert_eq!(json, "\"feeder_or_pnode\"");
    }
}
