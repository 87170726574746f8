//! # AgentConfig
//!
//! Cluster-scoped discovery configuration. Exactly one instance (selected by name)
//! is honored at a time.

use serde::{Deserialize, Serialize};

/// AgentConfig Custom Resource Definition
///
/// Declares which namespaces the controller manages and how to reach the
/// Tetrate management plane.
///
/// # Example
///
/// ```yaml
/// apiVersion: operator.arca.io/v1alpha1
/// kind: AgentConfig
/// metadata:
///   name: default
/// spec:
///   discoveryLabel: team=payments
///   tetrate:
///     endpoint: https://tsb.example.com:8443
///     apiToken: eyJhbGciOi...
///     organization: tetrate
///     tenant: arca
///     clusterName: prod-east
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AgentConfig",
    group = "operator.arca.io",
    version = "v1alpha1",
    status = "AgentConfigStatus",
    shortname = "agentcfg",
    printcolumn = r#"{"name":"Selector", "type":"string", "jsonPath":".spec.discoveryLabel"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Message", "type":"string", "jsonPath":".status.message"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigSpec {
    /// Label selector in `key=value` form
    pub discovery_label: String,
    /// Management plane connection
    #[serde(default)]
    pub tetrate: TetrateSpec,
}

/// Connection parameters for the Tetrate management plane
///
/// Every field is optional; missing values fall back to the controller's
/// `TETRATE_*` environment defaults.
#[derive(Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TetrateSpec {
    /// Base URL of the management plane API
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token
    #[serde(default)]
    pub api_token: Option<String>,
    /// Basic auth user (preferred over the token when a password is also set)
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    /// Cluster name prefixing namespaces in workspace selectors
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// Optional service fabric name, a second discovery dimension
    #[serde(default)]
    pub fabric_name: Option<String>,
    /// Disable TLS certificate verification
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl std::fmt::Debug for TetrateSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetrateSpec")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("organization", &self.organization)
            .field("tenant", &self.tenant)
            .field("cluster_name", &self.cluster_name)
            .field("fabric_name", &self.fabric_name)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

/// Lifecycle phase reported on the AgentConfig status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConfigPhase {
    /// Seen but not yet applied
    Pending,
    /// Applied; reconciliation active
    Ready,
    /// Rejected (malformed selector, missing endpoint or credentials)
    Failed,
    /// Authentication against the management plane failed
    Unusable,
}

impl ConfigPhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigPhase::Pending => "Pending",
            ConfigPhase::Ready => "Ready",
            ConfigPhase::Failed => "Failed",
            ConfigPhase::Unusable => "Unusable",
        }
    }
}

/// Status of the AgentConfig resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigStatus {
    #[serde(default)]
    pub phase: Option<ConfigPhase>,
    /// Human-readable description of the current state
    #[serde(default)]
    pub message: Option<String>,
    /// Generation the phase refers to
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// RFC3339 time of the last completed pass
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
    /// Namespaces synced in the last periodic pass
    #[serde(default)]
    pub last_pass_synced: Option<u32>,
    /// Namespaces that failed in the last periodic pass
    #[serde(default)]
    pub last_pass_failed: Option<u32>,
}

impl AgentConfigStatus {
    /// Status for a phase change, stamped with the current time
    #[must_use]
    pub fn with_phase(phase: ConfigPhase, message: impl Into<String>, generation: i64) -> Self {
        Self {
            phase: Some(phase),
            message: Some(message.into()),
            observed_generation: Some(generation),
            last_reconcile_time: Some(chrono::Utc::now().to_rfc3339()),
            ..Self::default()
        }
    }
}
