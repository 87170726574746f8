//! # Reconciler
//!
//! Core reconciliation logic keeping selected namespaces and services in sync
//! with Tetrate Service Bridge.
//!
//! ## Reconciliation Flow
//!
//! 1. `AgentConfig` applied: validate, connect, rebuild the discovery index,
//!    sweep every selected namespace
//! 2. Namespace event: admission through the index, label-change detection,
//!    then workspace, setting and gateway group sync
//! 3. Service event: recompute the namespace's gateway routes and annotate
//!    exposure status
//! 4. Workspace mirror event: create the local namespace and gateway install
//! 5. Timer: the same passes again for self-healing

pub mod agent_config;
pub mod dispatch;
pub mod namespace;
pub mod periodic;
pub mod service;
pub mod sync;
pub mod types;
pub mod workspace;

pub use dispatch::{
    ClusterObject, DispatchTable, EventClassifier, EventType, ResourceEvent, ResourceKind,
};
pub use periodic::{periodic_pass, reconcile_all, reverse_sync_all, run_periodic, PassSummary};
pub use service::{expose_if_annotated, ExposureError, ExposureStatus, ExposureSummary};
pub use sync::{create_or_update, SyncError, SyncOutcome};
pub use types::{
    LabelCache, NamespaceLocks, Reconciler, ReconcilerError, SyncLedger, SyncState, TriggerSource,
};
