//! # Remote Provider
//!
//! Seam between the reconciler and the Tetrate management plane.
//!
//! - `RemoteClient`: get/create/update/delete for hierarchical remote entities
//! - `RemoteConnector`: builds a client from connection parameters
//! - `tsb`: the reqwest-backed implementation

pub mod tsb;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Address of a remote entity inside an organization/tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityRef {
    Workspace {
        workspace: String,
    },
    WorkspaceSetting {
        workspace: String,
        name: String,
    },
    GatewayGroup {
        workspace: String,
        group: String,
    },
    Gateway {
        workspace: String,
        group: String,
        name: String,
    },
}

impl EntityRef {
    pub fn workspace(workspace: impl Into<String>) -> Self {
        Self::Workspace {
            workspace: workspace.into(),
        }
    }

    pub fn setting(workspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::WorkspaceSetting {
            workspace: workspace.into(),
            name: name.into(),
        }
    }

    pub fn gateway_group(workspace: impl Into<String>, group: impl Into<String>) -> Self {
        Self::GatewayGroup {
            workspace: workspace.into(),
            group: group.into(),
        }
    }

    pub fn gateway(
        workspace: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Gateway {
            workspace: workspace.into(),
            group: group.into(),
            name: name.into(),
        }
    }

    /// Short kind label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EntityRef::Workspace { .. } => "workspace",
            EntityRef::WorkspaceSetting { .. } => "setting",
            EntityRef::GatewayGroup { .. } => "gateway_group",
            EntityRef::Gateway { .. } => "gateway",
        }
    }

    /// Key wrapping the document in create bodies and responses
    #[must_use]
    pub fn body_key(&self) -> &'static str {
        match self {
            EntityRef::Workspace { .. } => "workspace",
            EntityRef::WorkspaceSetting { .. } => "settings",
            EntityRef::GatewayGroup { .. } => "group",
            EntityRef::Gateway { .. } => "gateway",
        }
    }

    /// Leaf name of the entity
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Workspace { workspace } => workspace,
            EntityRef::WorkspaceSetting { name, .. } => name,
            EntityRef::GatewayGroup { group, .. } => group,
            EntityRef::Gateway { name, .. } => name,
        }
    }

    /// Path of the collection the entity is created in, relative to the tenant
    #[must_use]
    pub fn collection_path(&self) -> String {
        match self {
            EntityRef::Workspace { .. } => "workspaces".to_string(),
            EntityRef::WorkspaceSetting { workspace, .. } => {
                format!("workspaces/{workspace}/settings")
            }
            EntityRef::GatewayGroup { workspace, .. } => {
                format!("workspaces/{workspace}/gatewaygroups")
            }
            EntityRef::Gateway {
                workspace, group, ..
            } => format!("workspaces/{workspace}/gatewaygroups/{group}/gateways"),
        }
    }

    /// Path of the entity itself, relative to the tenant
    #[must_use]
    pub fn item_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name())
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.item_path())
    }
}

/// A remote document together with its concurrency token
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub etag: Option<String>,
    /// Unwrapped entity document; includes `etag` when the server returned one
    pub body: Value,
}

/// Result of a remote read
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Absent,
}

impl<T> Lookup<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Lookup::Absent)
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Absent => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    /// Stale etag or concurrent modification
    #[error("conflict on {entity}: {message}")]
    Conflict { entity: String, message: String },
    #[error("authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },
    /// Connection, timeout or TLS failure
    #[error("transport error: {0}")]
    Transport(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    /// Request refused for a reason retrying will not fix
    #[error("request rejected {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Conflicts, transport failures and 5xx responses are worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Conflict { .. } | RemoteError::Transport(_) | RemoteError::Server { .. }
        )
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth { .. })
    }
}

/// HTTP transport to the management plane
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch an entity; a missing entity is `Lookup::Absent`, not an error
    async fn get(&self, entity: &EntityRef) -> Result<Lookup<RemoteDocument>, RemoteError>;

    /// Create an entity with the full desired document
    async fn create(&self, entity: &EntityRef, document: &Value)
        -> Result<RemoteDocument, RemoteError>;

    /// Replace an entity; `document` carries the etag the write is conditioned on
    async fn update(
        &self,
        entity: &EntityRef,
        document: &Value,
        etag: Option<&str>,
    ) -> Result<RemoteDocument, RemoteError>;

    /// Delete an entity; deleting an absent entity succeeds
    async fn delete(&self, entity: &EntityRef) -> Result<(), RemoteError>;
}

/// Credentials for the management plane
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub enum RemoteCredentials {
    Bearer(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteCredentials::Bearer(_) => f.write_str("Bearer(***)"),
            RemoteCredentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Resolved connection parameters for one active configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConnection {
    pub endpoint: String,
    pub organization: String,
    pub tenant: String,
    pub credentials: RemoteCredentials,
    pub insecure_skip_verify: bool,
    pub request_timeout: std::time::Duration,
}

/// Builds connected clients for a configuration
pub trait RemoteConnector: Send + Sync {
    /// # Errors
    /// Returns an error when the connection parameters cannot produce a client
    fn connect(&self, connection: &RemoteConnection) -> Result<Arc<dyn RemoteClient>, RemoteError>;
}
