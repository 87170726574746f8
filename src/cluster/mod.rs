//! # Cluster API
//!
//! Abstraction over the Kubernetes API calls the reconciler makes, so handlers
//! can run against an in-memory cluster in tests.

mod kube_cluster;

pub use kube_cluster::KubeCluster;

use crate::crd::{AgentConfigStatus, GatewayInstallSpec, XcpWorkspace};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

/// Metadata wanted on a namespace; existing keys not listed are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMeta {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Cluster operations used by the reconciler
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List namespaces, optionally filtered by a `key=value` label selector
    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<Namespace>, ClusterError>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError>;

    /// Merge annotations onto a service; `None` values remove the key
    async fn annotate_service(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), ClusterError>;

    /// Create the namespace or merge the given labels and annotations into it
    async fn ensure_namespace(&self, name: &str, meta: &NamespaceMeta) -> Result<(), ClusterError>;

    /// Create or patch a gateway install
    async fn apply_gateway_install(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        spec: &GatewayInstallSpec,
    ) -> Result<(), ClusterError>;

    async fn list_workspace_mirrors(&self, namespace: &str)
        -> Result<Vec<XcpWorkspace>, ClusterError>;

    async fn add_config_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ClusterError>;

    async fn remove_config_finalizer(&self, name: &str, finalizer: &str)
        -> Result<(), ClusterError>;

    async fn patch_config_status(
        &self,
        name: &str,
        status: &AgentConfigStatus,
    ) -> Result<(), ClusterError>;
}
