//! # Dispatch Table
//!
//! Routes classified watch events to their handlers. The table is built once
//! at startup; a `(kind, event)` pair with no entry is dropped.

use super::types::{Reconciler, ReconcilerError};
use super::{agent_config, namespace, service, workspace};
use crate::crd::{AgentConfig, XcpWorkspace};
use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::ResourceExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AgentConfig,
    Namespace,
    Service,
    WorkspaceMirror,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::AgentConfig => "agentconfig",
            ResourceKind::Namespace => "namespace",
            ResourceKind::Service => "service",
            ResourceKind::WorkspaceMirror => "workspace_mirror",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "added",
            EventType::Modified => "modified",
            EventType::Deleted => "deleted",
        }
    }
}

/// An object delivered by one of the watch streams
#[derive(Debug, Clone)]
pub enum ClusterObject {
    AgentConfig(AgentConfig),
    Namespace(Namespace),
    Service(Service),
    WorkspaceMirror(XcpWorkspace),
}

impl ClusterObject {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            ClusterObject::AgentConfig(_) => ResourceKind::AgentConfig,
            ClusterObject::Namespace(_) => ResourceKind::Namespace,
            ClusterObject::Service(_) => ResourceKind::Service,
            ClusterObject::WorkspaceMirror(_) => ResourceKind::WorkspaceMirror,
        }
    }

    /// `namespace/name` for namespaced objects, `name` otherwise
    #[must_use]
    pub fn key(&self) -> String {
        let (namespace, name) = match self {
            ClusterObject::AgentConfig(o) => (o.namespace(), o.name_any()),
            ClusterObject::Namespace(o) => (None, o.name_any()),
            ClusterObject::Service(o) => (o.namespace(), o.name_any()),
            ClusterObject::WorkspaceMirror(o) => (o.namespace(), o.name_any()),
        };
        match namespace {
            Some(ns) => format!("{ns}/{name}"),
            None => name,
        }
    }
}

/// A classified watch event
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub event_type: EventType,
    pub object: ClusterObject,
}

pub type Handler =
    fn(Arc<Reconciler>, ResourceEvent) -> BoxFuture<'static, Result<(), ReconcilerError>>;

/// `(kind, event)` to handler routing
#[derive(Debug)]
pub struct DispatchTable {
    handlers: HashMap<(ResourceKind, EventType), Handler>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTable {
    /// The controller's handler registrations
    #[must_use]
    pub fn new() -> Self {
        let mut handlers: HashMap<(ResourceKind, EventType), Handler> = HashMap::new();
        handlers.insert(
            (ResourceKind::AgentConfig, EventType::Added),
            |r, e| Box::pin(agent_config::on_config_applied(r, e)),
        );
        handlers.insert(
            (ResourceKind::AgentConfig, EventType::Modified),
            |r, e| Box::pin(agent_config::on_config_applied(r, e)),
        );
        handlers.insert(
            (ResourceKind::AgentConfig, EventType::Deleted),
            |r, e| Box::pin(agent_config::on_config_deleted(r, e)),
        );
        handlers.insert(
            (ResourceKind::Namespace, EventType::Added),
            |r, e| Box::pin(namespace::on_namespace_event(r, e)),
        );
        handlers.insert(
            (ResourceKind::Namespace, EventType::Modified),
            |r, e| Box::pin(namespace::on_namespace_event(r, e)),
        );
        handlers.insert(
            (ResourceKind::Namespace, EventType::Deleted),
            |r, e| Box::pin(namespace::on_namespace_deleted(r, e)),
        );
        handlers.insert(
            (ResourceKind::Service, EventType::Added),
            |r, e| Box::pin(service::on_service_event(r, e)),
        );
        handlers.insert(
            (ResourceKind::Service, EventType::Modified),
            |r, e| Box::pin(service::on_service_event(r, e)),
        );
        handlers.insert(
            (ResourceKind::Service, EventType::Deleted),
            |r, e| Box::pin(service::on_service_event(r, e)),
        );
        handlers.insert(
            (ResourceKind::WorkspaceMirror, EventType::Added),
            |r, e| Box::pin(workspace::on_mirror_applied(r, e)),
        );
        handlers.insert(
            (ResourceKind::WorkspaceMirror, EventType::Modified),
            |r, e| Box::pin(workspace::on_mirror_applied(r, e)),
        );
        handlers.insert(
            (ResourceKind::WorkspaceMirror, EventType::Deleted),
            |r, e| Box::pin(workspace::on_mirror_deleted(r, e)),
        );
        Self { handlers }
    }

    #[must_use]
    pub fn handler(&self, kind: ResourceKind, event_type: EventType) -> Option<Handler> {
        self.handlers.get(&(kind, event_type)).copied()
    }

    /// Run the handler registered for the event, if any
    ///
    /// # Errors
    /// Propagates the handler's error
    pub async fn dispatch(
        &self,
        reconciler: Arc<Reconciler>,
        event: ResourceEvent,
    ) -> Result<(), ReconcilerError> {
        match self.handler(event.object.kind(), event.event_type) {
            Some(handler) => handler(reconciler, event).await,
            None => {
                tracing::debug!(
                    kind = event.object.kind().as_str(),
                    event = event.event_type.as_str(),
                    "No handler registered"
                );
                Ok(())
            }
        }
    }
}

/// Turns watcher applies into ADD or MODIFY by remembering which keys were seen
#[derive(Debug, Default)]
pub struct EventClassifier {
    seen: Mutex<HashSet<(ResourceKind, String)>>,
}

impl EventClassifier {
    /// Classify an upsert of `object`
    pub fn applied(&self, object: ClusterObject) -> ResourceEvent {
        let key = (object.kind(), object.key());
        let first_sighting = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };
        ResourceEvent {
            event_type: if first_sighting {
                EventType::Added
            } else {
                EventType::Modified
            },
            object,
        }
    }

    /// Classify a removal of `object`
    pub fn deleted(&self, object: ClusterObject) -> ResourceEvent {
        let key = (object.kind(), object.key());
        match self.seen.lock() {
            Ok(mut seen) => seen.remove(&key),
            Err(poisoned) => poisoned.into_inner().remove(&key),
        };
        ResourceEvent {
            event_type: EventType::Deleted,
            object,
        }
    }
}
