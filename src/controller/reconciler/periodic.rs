//! # Periodic Reconciliation
//!
//! Self-healing timer. After an initial delay it fires every interval and,
//! once the configuration has been stable for the idle window, re-runs the
//! workspace manager for every selected namespace followed by the reverse
//! pass over workspace mirrors.

use super::agent_config::{report_auth_failure, write_pass_status};
use super::namespace::sync_namespace;
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use super::workspace::reverse_sync;
use crate::observability::metrics;
use futures::stream::{self, StreamExt};
use kube::ResourceExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

/// Per-pass namespace counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub synced: u32,
    pub failed: u32,
}

/// Re-sync every namespace selected by the active configuration
///
/// Namespaces are processed concurrently up to the worker limit. A failing
/// namespace is counted and logged; the pass carries on.
///
/// # Errors
/// [`ReconcilerError::Store`] without a usable configuration, cluster list
/// failures, and the first authentication failure (which also suspends the
/// configuration)
pub async fn reconcile_all(
    reconciler: &Reconciler,
    trigger: TriggerSource,
) -> Result<PassSummary, ReconcilerError> {
    let active = reconciler.store.active()?;
    let selector = active.selector.to_string();
    let namespaces = reconciler.cluster.list_namespaces(Some(&selector)).await?;
    debug!(
        trigger = trigger.as_str(),
        count = namespaces.len(),
        "Reconciling selected namespaces"
    );

    let abort = AtomicBool::new(false);
    let results: Vec<Result<(), ReconcilerError>> = stream::iter(namespaces)
        .map(|namespace| {
            let active = Arc::clone(&active);
            let abort = &abort;
            async move {
                let name = namespace.name_any();
                let _guard = reconciler.namespace_locks.lock(&name).await;
                reconciler.labels.replace(&name, namespace.labels().clone());
                if abort.load(Ordering::Relaxed) {
                    return Ok(());
                }
                let result = sync_namespace(reconciler, &active, &name, trigger).await;
                if let Err(e) = &result {
                    if e.is_auth() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    warn!(namespace = %name, "Namespace sync failed: {}", e);
                }
                result
            }
        })
        .buffer_unordered(reconciler.config.max_concurrent_reconciliations.max(1))
        .collect()
        .await;

    let mut summary = PassSummary::default();
    let mut auth_error = None;
    for result in results {
        match result {
            Ok(()) => summary.synced += 1,
            Err(e) => {
                summary.failed += 1;
                if e.is_auth() && auth_error.is_none() {
                    auth_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = auth_error {
        report_auth_failure(reconciler, &e).await;
        return Err(e);
    }
    Ok(summary)
}

/// Reverse-sync every managed mirror in the mirror namespace
///
/// # Errors
/// Only a failure to list mirrors; per-mirror errors are logged
pub async fn reverse_sync_all(reconciler: &Reconciler) -> Result<usize, ReconcilerError> {
    let mirrors = reconciler
        .cluster
        .list_workspace_mirrors(&reconciler.config.workspace_mirror_namespace)
        .await?;
    let mut synced = 0;
    for mirror in &mirrors {
        match reverse_sync(reconciler, mirror).await {
            Ok(true) => synced += 1,
            Ok(false) => {}
            Err(e) => warn!(workspace = %mirror.name_any(), "Reverse sync failed: {}", e),
        }
    }
    Ok(synced)
}

/// One timer tick; `None` when the pass was skipped
pub async fn periodic_pass(reconciler: &Reconciler) -> Option<PassSummary> {
    if !reconciler.store.is_stable(reconciler.config.periodic_idle) {
        debug!("Configuration changed recently, skipping periodic pass");
        return None;
    }
    let active = match reconciler.store.active() {
        Ok(active) => active,
        Err(e) => {
            debug!("Skipping periodic pass: {}", e);
            return None;
        }
    };

    let started = Instant::now();
    let span = info_span!("periodic.pass", config = %active.id);
    let summary = async {
        let summary = match reconcile_all(reconciler, TriggerSource::Periodic).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Periodic pass aborted: {}", e);
                return None;
            }
        };
        match reverse_sync_all(reconciler).await {
            Ok(mirrors) => debug!(mirrors = mirrors, "Reverse pass complete"),
            Err(e) => warn!("Reverse pass failed: {}", e),
        }
        write_pass_status(reconciler, &active, summary).await;
        info!(
            synced = summary.synced,
            failed = summary.failed,
            "Periodic pass complete"
        );
        Some(summary)
    }
    .instrument(span)
    .await;
    metrics::observe_pass_duration(started.elapsed().as_secs_f64());
    summary
}

/// Drive [`periodic_pass`] until `shutdown` is set
pub async fn run_periodic(reconciler: Arc<Reconciler>, shutdown: Arc<AtomicBool>) {
    let initial_delay = reconciler.config.periodic_initial_delay;
    let interval = reconciler.config.periodic_interval;
    info!(
        initial_delay_secs = initial_delay.as_secs(),
        interval_secs = interval.as_secs(),
        "Periodic reconciliation scheduled"
    );
    tokio::time::sleep(initial_delay).await;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            info!("Stopping periodic reconciliation");
            return;
        }
        periodic_pass(&reconciler).await;
    }
}
