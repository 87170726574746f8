//! # Reverse Sync
//!
//! Workspace mirrors written by the management plane become local namespaces
//! with a unified gateway install.

use super::dispatch::{ClusterObject, ResourceEvent};
use super::namespace::gateway_name;
use super::types::{Reconciler, ReconcilerError};
use crate::cluster::NamespaceMeta;
use crate::constants::{
    ANNOTATION_CONFIG_MODE, ANNOTATION_WORKSPACE_FQN, LABEL_MANAGED, LABEL_NAMESPACE,
    LABEL_WORKSPACE, TSB_ANNOTATION_CONFIG_MODE, TSB_ANNOTATION_FQN,
};
use crate::crd::{GatewayInstallSpec, XcpWorkspace};
use crate::observability::metrics;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// What a mirror asks for locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub namespace: String,
    pub meta: NamespaceMeta,
}

/// Local namespace requested by a mirror, if it is one of ours
#[must_use]
pub fn mirror_target(mirror: &XcpWorkspace) -> Option<MirrorTarget> {
    let name = mirror.name_any();
    let labels = mirror.labels();
    if labels.get(LABEL_MANAGED).is_none_or(|v| v != "true") {
        debug!(workspace = %name, "Workspace mirror is not managed by arca, skipping");
        return None;
    }
    let Some(namespace) = labels.get(LABEL_NAMESPACE).filter(|ns| !ns.is_empty()) else {
        warn!(
            workspace = %name,
            "Managed workspace mirror has no {} label, skipping", LABEL_NAMESPACE
        );
        return None;
    };

    let annotations = mirror.annotations();
    let mut ns_annotations = BTreeMap::new();
    if let Some(fqn) = annotations.get(TSB_ANNOTATION_FQN) {
        ns_annotations.insert(ANNOTATION_WORKSPACE_FQN.to_string(), fqn.clone());
    }
    if let Some(mode) = annotations.get(TSB_ANNOTATION_CONFIG_MODE) {
        ns_annotations.insert(ANNOTATION_CONFIG_MODE.to_string(), mode.clone());
    }

    Some(MirrorTarget {
        namespace: namespace.clone(),
        meta: NamespaceMeta {
            labels: BTreeMap::from([
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_WORKSPACE.to_string(), name),
            ]),
            annotations: ns_annotations,
        },
    })
}

/// Create or patch the namespace and gateway install for one mirror
///
/// Returns `false` without touching the cluster when the mirror is not ours
/// or no usable configuration is active.
///
/// # Errors
/// Cluster API failures
pub async fn reverse_sync(
    reconciler: &Reconciler,
    mirror: &XcpWorkspace,
) -> Result<bool, ReconcilerError> {
    if let Err(e) = reconciler.store.active() {
        debug!(workspace = %mirror.name_any(), "Skipping workspace mirror: {}", e);
        return Ok(false);
    }
    let Some(target) = mirror_target(mirror) else {
        return Ok(false);
    };
    let span = info_span!("workspace.reverse_sync", workspace = %mirror.name_any(), namespace = %target.namespace);
    async {
        reconciler
            .cluster
            .ensure_namespace(&target.namespace, &target.meta)
            .await?;
        let labels = BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_NAMESPACE.to_string(), target.namespace.clone()),
        ]);
        reconciler
            .cluster
            .apply_gateway_install(
                &target.namespace,
                &gateway_name(&target.namespace),
                labels,
                &GatewayInstallSpec::unified_load_balancer(),
            )
            .await?;
        info!("Namespace and gateway install reconciled from workspace mirror");
        Ok::<bool, ReconcilerError>(true)
    }
    .instrument(span)
    .await
}

pub async fn on_mirror_applied(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::WorkspaceMirror(mirror) = event.object else {
        return Ok(());
    };
    metrics::increment_reconciliations("workspace_mirror");
    match reverse_sync(&reconciler, &mirror).await {
        Ok(_) => Ok(()),
        Err(e) => {
            metrics::increment_reconciliation_errors("workspace_mirror");
            Err(e)
        }
    }
}

pub async fn on_mirror_deleted(
    _reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    if let ClusterObject::WorkspaceMirror(mirror) = event.object {
        info!(
            workspace = %mirror.name_any(),
            "Workspace mirror deleted, local namespace left in place"
        );
    }
    Ok(())
}
