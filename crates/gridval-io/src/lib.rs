//! # gridval-io: Loading and Persistence
//!
//! File formats consumed and produced by the gridval tools:
//!
//! - [`entities`] - entity directory (`zones.json`, `isos.json`, `substations.csv`,
//!   `feeders.csv`, `pnodes.csv`) into an [`EntitySet`](gridval_core::EntitySet)
//! - [`intervals`] - hourly interval CSV into an in-memory interval store
//! - [`assets`] - DER asset registry CSV
//! - [`run_store`] - pipeline run generations on disk with an atomic `LATEST` pointer
//!
//! Loaders skip malformed rows and report them through
//! [`LoadDiagnostics`](gridval_core::LoadDiagnostics) instead of failing the
//! whole file. A missing or unreadable file is an error.

pub mod assets;
pub mod entities;
pub mod intervals;
mod rows;
pub mod run_store;

pub use assets::{load_assets, write_assets};
pub use entities::{load_entities, EntityPaths};
pub use intervals::{load_intervals, read_observations};
pub use run_store::{RunStore, WriteLock};
