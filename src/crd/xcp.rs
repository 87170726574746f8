//! # Workspace Mirror
//!
//! `xcp.tetrate.io/v2` `Workspace` objects written into the cluster by the
//! management plane. The controller only reads them, so `spec` is kept as an
//! open map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Workspace",
    group = "xcp.tetrate.io",
    version = "v2",
    namespaced
)]
pub struct WorkspaceMirrorSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

pub use Workspace as XcpWorkspace;
