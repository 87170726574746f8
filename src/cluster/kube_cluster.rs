//! kube-rs implementation of [`ClusterClient`].

use super::{ClusterClient, ClusterError, NamespaceMeta};
use crate::constants::FIELD_MANAGER;
use crate::crd::{AgentConfig, AgentConfigStatus, GatewayInstall, GatewayInstallSpec, XcpWorkspace};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Cluster access through a kube [`Client`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn configs(&self) -> Api<AgentConfig> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<Namespace>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(api.list(&params).await?.items)
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn annotate_service(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": { "annotations": annotations }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(namespace = %namespace, service = %name, "Annotated service");
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str, meta: &NamespaceMeta) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": name,
                "labels": meta.labels,
                "annotations": meta.annotations,
            }
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&patch),
        )
        .await?;
        info!(namespace = %name, "Ensured namespace");
        Ok(())
    }

    async fn apply_gateway_install(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        spec: &GatewayInstallSpec,
    ) -> Result<(), ClusterError> {
        let api: Api<GatewayInstall> = Api::namespaced(self.client.clone(), namespace);
        let mut gateway = GatewayInstall::new(name, spec.clone());
        gateway.meta_mut().namespace = Some(namespace.to_string());
        gateway.meta_mut().labels = Some(labels);
        let object = serde_json::to_value(&gateway)?;
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await?;
        info!(namespace = %namespace, gateway = %name, "Applied gateway install");
        Ok(())
    }

    async fn list_workspace_mirrors(
        &self,
        namespace: &str,
    ) -> Result<Vec<XcpWorkspace>, ClusterError> {
        let api: Api<XcpWorkspace> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn add_config_finalizer(&self, name: &str, finalizer: &str) -> Result<(), ClusterError> {
        let api = self.configs();
        let config = api.get_opt(name).await?.ok_or_else(|| ClusterError::NotFound {
            kind: "AgentConfig",
            name: name.to_string(),
        })?;
        let mut finalizers = config.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(config = %name, "Added finalizer");
        Ok(())
    }

    async fn remove_config_finalizer(
        &self,
        name: &str,
        finalizer: &str,
    ) -> Result<(), ClusterError> {
        let api = self.configs();
        let Some(config) = api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = config
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(config = %name, "Removed finalizer");
        Ok(())
    }

    async fn patch_config_status(
        &self,
        name: &str,
        status: &AgentConfigStatus,
    ) -> Result<(), ClusterError> {
        let api = self.configs();
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
