//! # AgentConfig Lifecycle
//!
//! Applies, rejects and tears down the discovery configuration.
//!
//! - Only the configuration named `ACTIVE_CONFIG_NAME` is honored.
//! - A generation that fails validation is reported as `Failed` and ignored
//!   until the object's generation changes.
//! - Deletion goes through the `operator.arca.io/agent-cleanup` finalizer and
//!   only clears in-memory state.

use super::dispatch::{ClusterObject, ResourceEvent};
use super::periodic::{reconcile_all, PassSummary};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::constants::CONFIG_FINALIZER;
use crate::controller::store::ActiveConfig;
use crate::crd::{AgentConfig, AgentConfigStatus, ConfigPhase};
use crate::observability::metrics;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub async fn on_config_applied(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::AgentConfig(config) = event.object else {
        return Ok(());
    };
    if config.metadata.deletion_timestamp.is_some() {
        return cleanup_config(&reconciler, &config, true).await;
    }
    apply_config(&reconciler, &config).await
}

pub async fn on_config_deleted(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::AgentConfig(config) = event.object else {
        return Ok(());
    };
    cleanup_config(&reconciler, &config, false).await
}

fn is_active_name(reconciler: &Reconciler, config: &AgentConfig) -> bool {
    let name = config.name_any();
    if name == reconciler.config.active_config_name {
        true
    } else {
        debug!(
            "Ignoring AgentConfig '{}', only '{}' is honored",
            name, reconciler.config.active_config_name
        );
        false
    }
}

/// Validate and install a configuration, then sweep every matching namespace
///
/// Re-deliveries of an already installed, rejected or unusable generation are
/// no-ops, which also absorbs the events caused by our own status patches.
///
/// # Errors
/// [`ReconcilerError::Config`] when the configuration is invalid, or the
/// first error of the startup sweep
pub async fn apply_config(
    reconciler: &Reconciler,
    config: &AgentConfig,
) -> Result<(), ReconcilerError> {
    if !is_active_name(reconciler, config) {
        return Ok(());
    }
    let name = config.name_any();
    let generation = config.metadata.generation.unwrap_or(0);

    if reconciler.store.is_rejected(&name, generation) {
        debug!(
            generation = generation,
            "AgentConfig '{}' generation was rejected, waiting for a change", name
        );
        return Ok(());
    }
    if let Some(installed) = reconciler.store.installed() {
        if installed.id == name && installed.generation == generation {
            debug!(generation = generation, "AgentConfig '{}' already applied", name);
            return Ok(());
        }
    }

    let span = info_span!("agentconfig.apply", config = %name, generation = generation);
    install_config(reconciler, config, &name, generation)
        .instrument(span)
        .await
}

async fn install_config(
    reconciler: &Reconciler,
    config: &AgentConfig,
    name: &str,
    generation: i64,
) -> Result<(), ReconcilerError> {
    metrics::increment_reconciliations("agentconfig");

    if !config.finalizers().iter().any(|f| f == CONFIG_FINALIZER) {
        reconciler
            .cluster
            .add_config_finalizer(name, CONFIG_FINALIZER)
            .await?;
    }

    let active = match ActiveConfig::resolve(
        config,
        &reconciler.config,
        reconciler.connector.as_ref(),
    ) {
        Ok(active) => active,
        Err(e) => {
            error!("AgentConfig '{}' is invalid: {}", name, e);
            metrics::increment_reconciliation_errors("agentconfig");
            reconciler.store.clear();
            reconciler.store.reject(name, generation);
            reconciler.index.clear();
            write_status(
                reconciler,
                name,
                AgentConfigStatus::with_phase(ConfigPhase::Failed, e.to_string(), generation),
            )
            .await;
            return Err(e.into());
        }
    };

    let active = reconciler.store.apply(active);
    reconciler.index.rebuild([(&active.id, &active.selector)]);
    reconciler.ledger.clear();
    info!(
        selector = %active.selector,
        endpoint = %active.connection.endpoint,
        dimensions = ?active.dimensions,
        "AgentConfig '{}' applied",
        name
    );
    write_status(
        reconciler,
        name,
        AgentConfigStatus::with_phase(
            ConfigPhase::Pending,
            "Configuration applied, initial sweep running",
            generation,
        ),
    )
    .await;

    match reconcile_all(reconciler, TriggerSource::ConfigApplied).await {
        Ok(summary) => {
            write_pass_status(reconciler, &active, summary).await;
            Ok(())
        }
        Err(e) => {
            warn!("Initial sweep for AgentConfig '{}' failed: {}", name, e);
            Err(e)
        }
    }
}

/// Clear the in-memory state owned by a configuration
///
/// With `remove_finalizer` the finalizer is released afterwards so the API
/// server can finish the deletion. Remote workspaces are left in place.
///
/// # Errors
/// Fails if the finalizer cannot be removed
pub async fn cleanup_config(
    reconciler: &Reconciler,
    config: &AgentConfig,
    remove_finalizer: bool,
) -> Result<(), ReconcilerError> {
    if !is_active_name(reconciler, config) {
        return Ok(());
    }
    let name = config.name_any();
    reconciler.store.clear();
    reconciler.index.clear();
    reconciler.ledger.clear();
    info!("AgentConfig '{}' removed, reconciliation suspended", name);

    if remove_finalizer && config.finalizers().iter().any(|f| f == CONFIG_FINALIZER) {
        reconciler
            .cluster
            .remove_config_finalizer(&name, CONFIG_FINALIZER)
            .await?;
        debug!("Removed finalizer from AgentConfig '{}'", name);
    }
    Ok(())
}

/// Suspend reconciliation after the management plane refused our credentials
pub async fn report_auth_failure(reconciler: &Reconciler, error: &ReconcilerError) {
    reconciler.store.mark_unusable();
    let Some(active) = reconciler.store.installed() else {
        return;
    };
    error!(
        "Tetrate API refused the credentials of AgentConfig '{}', suspending: {}",
        active.id, error
    );
    write_status(
        reconciler,
        &active.id,
        AgentConfigStatus::with_phase(ConfigPhase::Unusable, error.to_string(), active.generation),
    )
    .await;
}

/// Record a pass result on the configuration status
pub async fn write_pass_status(reconciler: &Reconciler, active: &ActiveConfig, summary: PassSummary) {
    let message = if summary.failed == 0 {
        format!("{} namespaces synchronized", summary.synced)
    } else {
        format!(
            "{} namespaces synchronized, {} failed",
            summary.synced, summary.failed
        )
    };
    let mut status = AgentConfigStatus::with_phase(ConfigPhase::Ready, message, active.generation);
    status.last_pass_synced = Some(summary.synced);
    status.last_pass_failed = Some(summary.failed);
    write_status(reconciler, &active.id, status).await;
}

/// Status patches are best effort
async fn write_status(reconciler: &Reconciler, name: &str, status: AgentConfigStatus) {
    if let Err(e) = reconciler.cluster.patch_config_status(name, &status).await {
        warn!("Failed to update status of AgentConfig '{}': {}", name, e);
    }
}
