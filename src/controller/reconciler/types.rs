//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{ClusterClient, ClusterError};
use crate::config::ControllerConfig;
use crate::controller::discovery::DiscoveryIndex;
use crate::controller::reconciler::sync::SyncError;
use crate::controller::store::{ConfigError, ConfigStore, StoreError};
use crate::provider::{EntityRef, RemoteConnector, RemoteError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Several items of a batch failed; each was logged where it happened
    #[error("{failed} of {total} items failed")]
    Partial { failed: usize, total: usize },
}

impl ReconcilerError {
    /// Whether the error came from a refused credential
    #[must_use]
    pub fn is_auth(&self) -> bool {
        match self {
            ReconcilerError::Sync(e) => e.is_auth(),
            ReconcilerError::Remote(e) => e.is_auth(),
            _ => false,
        }
    }
}

/// Trigger source for reconciliation
/// Tracks why a reconciliation was triggered for better debugging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Watch event for the object itself
    Event,
    /// Periodic self-healing pass
    Periodic,
    /// Sweep after a configuration was applied
    ConfigApplied,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Event => "event",
            TriggerSource::Periodic => "periodic",
            TriggerSource::ConfigApplied => "config-applied",
        }
    }
}

/// Per-entity sync progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    DesiredKnown,
    Syncing,
    Synced,
    Failed,
}

/// In-memory record of the last known sync state of every remote entity
#[derive(Debug, Default)]
pub struct SyncLedger {
    states: Mutex<HashMap<EntityRef, SyncState>>,
}

impl SyncLedger {
    pub fn record(&self, entity: &EntityRef, state: SyncState) {
        match self.states.lock() {
            Ok(mut states) => {
                states.insert(entity.clone(), state);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(entity.clone(), state);
            }
        }
    }

    #[must_use]
    pub fn state(&self, entity: &EntityRef) -> Option<SyncState> {
        match self.states.lock() {
            Ok(states) => states.get(entity).copied(),
            Err(poisoned) => poisoned.into_inner().get(entity).copied(),
        }
    }

    pub fn clear(&self) {
        match self.states.lock() {
            Ok(mut states) => states.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Last-seen labels per namespace, used to detect selector gain and loss
#[derive(Debug, Default)]
pub struct LabelCache {
    labels: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl LabelCache {
    /// Store the current labels, returning the previous ones
    pub fn replace(
        &self,
        namespace: &str,
        labels: BTreeMap<String, String>,
    ) -> Option<BTreeMap<String, String>> {
        match self.labels.lock() {
            Ok(mut cache) => cache.insert(namespace.to_string(), labels),
            Err(poisoned) => poisoned.into_inner().insert(namespace.to_string(), labels),
        }
    }

    pub fn remove(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        match self.labels.lock() {
            Ok(mut cache) => cache.remove(namespace),
            Err(poisoned) => poisoned.into_inner().remove(namespace),
        }
    }

    #[must_use]
    pub fn get(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        match self.labels.lock() {
            Ok(cache) => cache.get(namespace).cloned(),
            Err(poisoned) => poisoned.into_inner().get(namespace).cloned(),
        }
    }

    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.get(namespace).is_some()
    }
}

/// One async lock per namespace
///
/// Events for the same namespace are handled one at a time while different
/// namespaces still proceed in parallel.
#[derive(Debug, Default)]
pub struct NamespaceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NamespaceLocks {
    pub async fn lock(&self, namespace: &str) -> OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(namespace.to_string()).or_default()),
            Err(poisoned) => {
                Arc::clone(poisoned.into_inner().entry(namespace.to_string()).or_default())
            }
        };
        lock.lock_owned().await
    }
}

/// Reconciler context shared by every handler
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterClient>,
    pub connector: Arc<dyn RemoteConnector>,
    pub store: Arc<ConfigStore>,
    pub index: Arc<DiscoveryIndex>,
    pub ledger: Arc<SyncLedger>,
    pub labels: Arc<LabelCache>,
    pub namespace_locks: Arc<NamespaceLocks>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        connector: Arc<dyn RemoteConnector>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            cluster,
            connector,
            store: Arc::new(ConfigStore::new()),
            index: Arc::new(DiscoveryIndex::new()),
            ledger: Arc::new(SyncLedger::default()),
            labels: Arc::new(LabelCache::default()),
            namespace_locks: Arc::new(NamespaceLocks::default()),
            config,
        }
    }
}
