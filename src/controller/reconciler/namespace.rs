//! # Namespace Reconciliation
//!
//! Admission, label-change detection and the workspace manager.
//!
//! For a namespace selected by the active configuration the remote side gets:
//!
//! - a `Workspace` named after the namespace, one sync per discovery dimension
//!   so every dimension adds its `<dimension>/<namespace>` selector entry
//! - the `default` workspace setting
//! - the `<namespace>-gateways` gateway group
//!
//! followed by the namespace's service exposure pass.

use super::agent_config::report_auth_failure;
use super::dispatch::{ClusterObject, ResourceEvent};
use super::service::expose_namespace;
use super::sync::create_or_update;
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::config::LabelRemovalPolicy;
use crate::constants::{LABEL_MANAGED, LABEL_NAMESPACE, WORKSPACE_SETTING_NAME};
use crate::controller::store::ActiveConfig;
use crate::observability::metrics;
use crate::provider::EntityRef;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Gateway group holding the namespace's gateway
#[must_use]
pub fn gateway_group_name(namespace: &str) -> String {
    format!("{namespace}-gateways")
}

/// Gateway carrying the namespace's exposed routes
#[must_use]
pub fn gateway_name(namespace: &str) -> String {
    format!("{namespace}-gateway")
}

fn generation_metadata(namespace: &str) -> Value {
    json!({
        "labels": {
            LABEL_MANAGED: "true",
            LABEL_NAMESPACE: namespace,
        }
    })
}

fn description(namespace: &str) -> String {
    format!("Managed by arca for namespace {namespace}")
}

/// Desired workspace fragment contributed by one discovery dimension
#[must_use]
pub fn desired_workspace(namespace: &str, dimension: &str) -> Value {
    json!({
        "displayName": namespace,
        "description": description(namespace),
        "namespaceSelector": { "names": [format!("{dimension}/{namespace}")] },
        "configGenerationMetadata": generation_metadata(namespace),
    })
}

#[must_use]
pub fn desired_setting(namespace: &str) -> Value {
    json!({
        "displayName": format!("{namespace} settings"),
        "description": description(namespace),
        "configGenerationMetadata": generation_metadata(namespace),
    })
}

#[must_use]
pub fn desired_gateway_group(namespace: &str, dimensions: &[String]) -> Value {
    let names: Vec<String> = dimensions
        .iter()
        .map(|dimension| format!("{dimension}/{namespace}"))
        .collect();
    json!({
        "displayName": gateway_group_name(namespace),
        "description": description(namespace),
        "namespaceSelector": { "names": names },
        "configMode": "BRIDGED",
        "configGenerationMetadata": generation_metadata(namespace),
    })
}

/// Whether any registered configuration selects these labels
fn is_selected(reconciler: &Reconciler, labels: &BTreeMap<String, String>) -> bool {
    !reconciler.index.matches(labels).is_empty()
}

pub async fn on_namespace_event(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::Namespace(namespace) = event.object else {
        return Ok(());
    };
    let name = namespace.name_any();
    let _guard = reconciler.namespace_locks.lock(&name).await;
    // Events may be handled out of order; act on the namespace as it is now
    match reconciler.cluster.get_namespace(&name).await? {
        Some(current) if current.metadata.deletion_timestamp.is_none() => {
            handle_namespace(&reconciler, &current).await
        }
        _ => namespace_removed(&reconciler, &name).await,
    }
}

pub async fn on_namespace_deleted(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::Namespace(namespace) = event.object else {
        return Ok(());
    };
    let name = namespace.name_any();
    let _guard = reconciler.namespace_locks.lock(&name).await;
    namespace_removed(&reconciler, &name).await
}

/// Admission and label-change detection for one namespace
///
/// # Errors
/// The first failed remote sync for the namespace
pub async fn handle_namespace(
    reconciler: &Reconciler,
    namespace: &Namespace,
) -> Result<(), ReconcilerError> {
    let name = namespace.name_any();
    let labels = namespace.labels().clone();
    let previous = reconciler.labels.replace(&name, labels.clone());

    let selected = is_selected(reconciler, &labels);
    let was_selected = previous
        .as_ref()
        .is_some_and(|previous| is_selected(reconciler, previous));

    if !selected {
        if was_selected {
            return selector_lost(reconciler, &name).await;
        }
        metrics::increment_filtered_events("namespace");
        debug!(namespace = %name, "Namespace not selected, skipping");
        return Ok(());
    }
    if previous.is_some() && !was_selected {
        info!(namespace = %name, "Namespace acquired the discovery label");
    }

    let active = match reconciler.store.active() {
        Ok(active) => active,
        Err(e) => {
            debug!(namespace = %name, "Skipping namespace: {}", e);
            return Ok(());
        }
    };
    let result = sync_namespace(reconciler, &active, &name, TriggerSource::Event).await;
    if let Err(e) = &result {
        if e.is_auth() {
            report_auth_failure(reconciler, e).await;
        }
    }
    result
}

async fn namespace_removed(reconciler: &Reconciler, name: &str) -> Result<(), ReconcilerError> {
    let previous = reconciler.labels.remove(name);
    if previous.is_some_and(|previous| is_selected(reconciler, &previous)) {
        return selector_lost(reconciler, name).await;
    }
    Ok(())
}

/// Apply the label-removal policy to a namespace that stopped matching
///
/// # Errors
/// A failed remote delete under the `delete` policy
pub async fn selector_lost(reconciler: &Reconciler, namespace: &str) -> Result<(), ReconcilerError> {
    match reconciler.config.label_removal_policy {
        LabelRemovalPolicy::Retain => {
            info!(
                namespace = %namespace,
                "Namespace no longer selected, retaining remote workspace"
            );
            Ok(())
        }
        LabelRemovalPolicy::Delete => {
            let active = match reconciler.store.active() {
                Ok(active) => active,
                Err(e) => {
                    debug!(namespace = %namespace, "Skipping remote cleanup: {}", e);
                    return Ok(());
                }
            };
            let result = delete_namespace_entities(&active, namespace).await;
            if let Err(e) = &result {
                if e.is_auth() {
                    report_auth_failure(reconciler, e).await;
                }
            }
            result
        }
    }
}

/// Remove the remote entities of a namespace, children first
async fn delete_namespace_entities(
    active: &ActiveConfig,
    namespace: &str,
) -> Result<(), ReconcilerError> {
    let group = gateway_group_name(namespace);
    let entities = [
        EntityRef::gateway(namespace, group.as_str(), gateway_name(namespace)),
        EntityRef::gateway_group(namespace, group.as_str()),
        EntityRef::setting(namespace, WORKSPACE_SETTING_NAME),
        EntityRef::workspace(namespace),
    ];
    for entity in &entities {
        active.remote.delete(entity).await?;
        info!(namespace = %namespace, "Deleted {}", entity);
    }
    Ok(())
}

/// Run the workspace manager and the exposure pass for one namespace
///
/// # Errors
/// The first failed remote sync; later entities of the namespace are skipped
pub async fn sync_namespace(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    namespace: &str,
    trigger: TriggerSource,
) -> Result<(), ReconcilerError> {
    let span = info_span!("namespace.sync", namespace = %namespace, trigger = trigger.as_str());
    sync_workspace_tree(reconciler, active, namespace)
        .instrument(span)
        .await
}

async fn sync_workspace_tree(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    namespace: &str,
) -> Result<(), ReconcilerError> {
    metrics::increment_reconciliations("namespace");
    let remote = active.remote.as_ref();
    let policy = &reconciler.config.retry;
    let ledger = reconciler.ledger.as_ref();

    let result = async {
        let workspace = EntityRef::workspace(namespace);
        for dimension in &active.dimensions {
            create_or_update(
                remote,
                &workspace,
                &desired_workspace(namespace, dimension),
                policy,
                ledger,
            )
            .await?;
        }
        create_or_update(
            remote,
            &EntityRef::setting(namespace, WORKSPACE_SETTING_NAME),
            &desired_setting(namespace),
            policy,
            ledger,
        )
        .await?;
        create_or_update(
            remote,
            &EntityRef::gateway_group(namespace, gateway_group_name(namespace)),
            &desired_gateway_group(namespace, &active.dimensions),
            policy,
            ledger,
        )
        .await?;
        expose_namespace(reconciler, active, namespace).await?;
        Ok::<(), ReconcilerError>(())
    }
    .await;

    if result.is_err() {
        metrics::increment_reconciliation_errors("namespace");
    }
    result
}
