//! Database engine for VeloxDB (§2, §4.5–§4.10).
//!
//! This crate orchestrates every lower layer into one coherent transaction
//! lifecycle:
//! - [`Database`]: open/restore, begin/commit/rollback, model updates
//! - `model`: the class/property/index catalog and the online schema-update
//!   protocol (§4.9)
//! - `integrity`: delete-policy enforcement sourced from the
//!   inverse-reference map (§4.3)
//! - `gc`: oldest-reader tracking and version reclamation (§4.7)
//! - `version`: the commit fence and visible-version sequencer (§4.6)
//! - `background`: the worker pool driving GC sweeps, snapshot rotation,
//!   and index refill
//! - `config`: the on-disk `velox.toml` database configuration
//!
//! `velox-engine` is the only crate that knows about every other layer —
//! storage, concurrency, durability, and replication are each opaque to one
//! another, and only meet here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod config;
pub mod database;
pub mod gc;
pub mod integrity;
pub mod model;
pub mod version;

pub use background::{BackgroundScheduler, BackpressureError, SchedulerStats, TaskPriority};
pub use config::{DurabilityMode, VeloxConfig, CONFIG_FILE_NAME};
pub use database::Database;
pub use gc::GarbageCollector;
pub use integrity::{plan_delete, DeletePlan};
pub use model::ModelManager;
pub use version::{CommitFence, VersionManager};
