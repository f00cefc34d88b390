//! Core orchestration engine for batch VM migrations: inventory filtering,
//! instance-type sizing, plan expansion, durable per-VM state, the stage
//! graphs for each guest OS family, and the concurrency-limited pipeline
//! executor that drives them. Everything outside the `external` module's
//! trait contracts is pure and synchronous; `external` is the only seam
//! where this crate talks to vSphere, object storage, or a cloud provider.

pub mod catalogue;
pub mod config;
pub mod error;
pub mod estimator;
pub mod external;
pub mod filter;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod semaphore;
pub mod sizing;
pub mod stages;
pub mod state;
pub mod vm;

pub use error::{EngineError, Result};
