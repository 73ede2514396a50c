//! # gridval-algo: Resolution, Scoring and Valuation
//!
//! The four engine components, leaf first:
//!
//! - [`resolver`] - point-in-polygon zone lookup and per-territory nearest
//!   neighbour search over a [`spatial`] index, with graded confidence
//! - [`scoring`] / [`store`] - per-entity congestion and loading scores from
//!   hourly interval data, persisted as append-only generations
//! - [`valuation`] / [`retrospective`] - dollar value per kW-year from a
//!   resolved context and one pinned score generation
//! - [`portfolio`] - per-ISO roll-ups over the latest valuation of each asset
//!
//! [`Engine`] wires them together behind the request/response operations.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridval_algo::{Engine, InMemoryIntervalStore, ScoreStore};
//! use gridval_core::{EngineConfig, EntitySet};
//!
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     EntitySet::default(),
//!     Arc::new(ScoreStore::new()),
//!     Arc::new(InMemoryIntervalStore::new()),
//! )?;
//! let ctx = engine.resolve_geo(39.95, -75.16)?;
//! println!("{} ({})", ctx.resolution_depth, ctx.confidence);
//! # Ok::<(), gridval_core::GridvalError>(())
//! ```

pub mod cache;
pub mod engine;
pub mod intervals;
pub mod portfolio;
pub mod resolver;
pub mod retrospective;
pub mod scoring;
pub mod spatial;
pub mod store;
pub mod valuation;

pub use cache::{CacheKey, ValuationCache};
pub use engine::{AssetRegistry, Engine};
pub use intervals::{InMemoryIntervalStore, IntervalStore};
pub use portfolio::{latest_valuations, summarize, ValuationProvider};
pub use resolver::HierarchyResolver;
pub use retrospective::valuate_retrospective;
pub use scoring::{
    floor_hour, run_pipeline, score_observations, HourlyAccumulator, IntervalObservation,
    ScoreWindow,
};
pub use spatial::{haversine_km, Nearest, SpatialIndex};
pub use store::{RunWriter, ScoreGeneration, ScoreStore};
pub use valuation::{check_request, Components, DerRequest, LevelScores, Valuator};
