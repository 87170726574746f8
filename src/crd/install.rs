//! # Gateway Install
//!
//! `install.tetrate.io/v1alpha1` `Gateway`, the local ingress gateway the
//! controller installs for each reverse-synced namespace.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keeps gateway pods on Linux nodes
const NODE_SELECTOR_ANNOTATION: &str = "traffic.istio.io/nodeSelector";
const LINUX_NODE_SELECTOR: &str = r#"{"kubernetes.io/os": "linux"}"#;

#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Gateway",
    group = "install.tetrate.io",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInstallSpec {
    /// Gateway flavour, always `UNIFIED` for controller-managed installs
    #[serde(rename = "type")]
    pub gateway_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_spec: Option<GatewayKubeSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GatewayKubeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<GatewayServiceSpec>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub struct GatewayServiceSpec {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl GatewayInstallSpec {
    /// Unified gateway fronted by a LoadBalancer service
    #[must_use]
    pub fn unified_load_balancer() -> Self {
        Self {
            gateway_type: "UNIFIED".to_string(),
            kube_spec: Some(GatewayKubeSpec {
                service: Some(GatewayServiceSpec {
                    service_type: "LoadBalancer".to_string(),
                    annotations: BTreeMap::from([(
                        NODE_SELECTOR_ANNOTATION.to_string(),
                        LINUX_NODE_SELECTOR.to_string(),
                    )]),
                }),
            }),
        }
    }
}

pub use Gateway as GatewayInstall;
