//! Satlink Reconcile
//!
//! Keeps a live link topology in step with a directory of visibility
//! snapshots.
//!
//! - [`MatrixStore`] orders and loads snapshot files
//! - [`LinkOrchestrator`] applies a diff through [`LinkOps`] in throttled batches
//! - [`ScanCoordinator`] runs one isolated discovery task per node through
//!   [`RemoteExec`] and fans artifacts in to collectors
//! - [`ReconciliationLoop`] ties them together, one cycle per snapshot
//!
//! The substrate traits are the only way out of this crate; concrete
//! implementations live in `satlink-substrate`.

mod collector;
mod config;
mod error;
mod ops;
mod orchestrator;
mod reconcile;
mod scan;
mod store;

#[cfg(test)]
mod testing;

pub use collector::{CollectorMap, CollectorRange};
pub use config::{BatchConfig, ReconcileConfig, ScanConfig};
pub use error::{Error, Result};
pub use ops::{Artifact, DiscoveryRequest, LinkEnd, LinkOps, LinkRef, RemoteExec};
pub use orchestrator::{Action, ApplySummary, BatchOutcome, LinkOrchestrator};
pub use reconcile::{
    CycleOutcome, CycleReport, LoopHandle, Phase, ReconciliationLoop, RunSummary, TopologyState,
};
pub use scan::{NodeScan, ScanCoordinator, ScanOutcome, ScanReport};
pub use store::{MatrixFilter, MatrixStore, Snapshot, SnapshotEntry};
