//! Measured hourly interval data, the input to scoring and retrospective valuation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use gridval_core::{GridLevel, GridvalResult};

use crate::scoring::{floor_hour, IntervalObservation};

/// Read access to the interval data store.
///
/// Implementations report store failures as `DataUnavailable`. Missing hours
/// are not an error at this layer; callers check coverage themselves.
pub trait IntervalStore: Send + Sync {
    /// Observations for one entity with `start <= hour < end`, in hour order.
    fn observations(
        &self,
        level: GridLevel,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> GridvalResult<Vec<IntervalObservation>>;
}

/// Interval data held in memory, one observation per entity-hour.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIntervalStore {
    series: HashMap<(GridLevel, String), BTreeMap<DateTime<Utc>, IntervalObservation>>,
}

impl InMemoryIntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observations(observations: impl IntoIterator<Item = IntervalObservation>) -> Self {
        let mut store = Self::new();
        for obs in observations {
            store.insert(obs);
        }
        store
    }

    /// Insert an observation, snapping its timestamp to the hour. A later
    /// observation for the same entity-hour replaces the earlier one.
    pub fn insert(&mut self, mut obs: IntervalObservation) {
        obs.hour = floor_hour(obs.hour);
        self.series
            .entry((obs.level, obs.entity_id.clone()))
            .or_default()
            .insert(obs.hour, obs);
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Every observation, ordered by (level, entity, hour).
    pub fn all(&self) -> Vec<IntervalObservation> {
        let mut keys: Vec<&(GridLevel, String)> = self.series.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|k| self.series[k].values().cloned())
            .collect()
    }

    /// Earliest and latest hour present, if any.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.series.values().filter_map(|s| s.keys().next()).min()?;
        let last = self
            .series
            .values()
            .filter_map(|s| s.keys().next_back())
            .max()?;
        Some((*first, *last))
    }
}

impl IntervalStore for InMemoryIntervalStore {
    fn observations(
        &self,
        level: GridLevel,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> GridvalResult<Vec<IntervalObservation>> {
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(self
            .series
            .get(&(level, entity_id.to_string()))
            .map(|s| s.range(start..end).map(|(_, o)| o.clone()).collect())
            .unwrap_or_default())
    }
}
