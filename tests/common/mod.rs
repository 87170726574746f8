//! Common test utilities
//!
//! In-memory stand-ins for the Kubernetes API and the Tetrate management
//! plane, plus builders for the objects the handlers consume.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use arca_controller::cluster::{ClusterClient, ClusterError, NamespaceMeta};
use arca_controller::config::{ControllerConfig, RetryPolicy};
use arca_controller::controller::reconciler::Reconciler;
use arca_controller::crd::{
    AgentConfig, AgentConfigSpec, AgentConfigStatus, GatewayInstallSpec, TetrateSpec,
    WorkspaceMirrorSpec, XcpWorkspace,
};
use arca_controller::provider::{
    EntityRef, Lookup, RemoteClient, RemoteConnection, RemoteConnector, RemoteDocument,
    RemoteError,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` so every test in a binary can call it.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test binary component may already have installed one
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub const CLUSTER: &str = "east";
pub const SELECTOR: &str = "team=payments";

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct RemoteState {
    documents: HashMap<EntityRef, Value>,
    version: u64,
    next_failures: HashMap<Op, VecDeque<RemoteError>>,
    always_fail: HashMap<Op, RemoteError>,
    interference: HashMap<EntityRef, Value>,
    calls: Vec<(Op, EntityRef)>,
}

impl RemoteState {
    fn next_etag(&mut self) -> String {
        self.version += 1;
        format!("\"v{}\"", self.version)
    }

    fn store(&mut self, entity: &EntityRef, mut body: Value) -> RemoteDocument {
        let etag = self.next_etag();
        if let Value::Object(map) = &mut body {
            map.insert("etag".to_string(), Value::String(etag.clone()));
        }
        self.documents.insert(entity.clone(), body.clone());
        RemoteDocument {
            etag: Some(etag),
            body,
        }
    }

    fn scripted_failure(&mut self, op: Op) -> Option<RemoteError> {
        if let Some(error) = self.always_fail.get(&op) {
            return Some(error.clone());
        }
        self.next_failures.get_mut(&op).and_then(VecDeque::pop_front)
    }
}

/// Management plane keeping documents in memory with etag versioning
#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    /// Store a document as if another writer had created it
    pub fn seed(&self, entity: &EntityRef, body: Value) {
        self.lock().store(entity, body);
    }

    pub fn document(&self, entity: &EntityRef) -> Option<Value> {
        self.lock().documents.get(entity).cloned()
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.lock().documents.contains_key(entity)
    }

    /// Fail the next call of `op` with `error`
    pub fn fail_next(&self, op: Op, error: RemoteError) {
        self.lock()
            .next_failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `op` with `error`
    pub fn fail_always(&self, op: Op, error: RemoteError) {
        self.lock().always_fail.insert(op, error);
    }

    /// Apply a concurrent edit just before the next update of `entity` lands
    pub fn interfere_on_next_update(&self, entity: &EntityRef, patch: Value) {
        self.lock().interference.insert(entity.clone(), patch);
    }

    pub fn calls(&self) -> Vec<(Op, EntityRef)> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|(o, _)| *o == op).count()
    }

    /// Creates, updates and deletes issued so far
    pub fn writes(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| *op != Op::Get)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

pub fn conflict(entity: &EntityRef) -> RemoteError {
    RemoteError::Conflict {
        entity: entity.to_string(),
        message: "stale etag".to_string(),
    }
}

pub fn unauthorized() -> RemoteError {
    RemoteError::Auth {
        status: 401,
        message: "token expired".to_string(),
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn get(&self, entity: &EntityRef) -> Result<Lookup<RemoteDocument>, RemoteError> {
        let mut state = self.lock();
        state.calls.push((Op::Get, entity.clone()));
        if let Some(error) = state.scripted_failure(Op::Get) {
            return Err(error);
        }
        Ok(match state.documents.get(entity) {
            Some(body) => Lookup::Found(RemoteDocument {
                etag: body.get("etag").and_then(Value::as_str).map(str::to_string),
                body: body.clone(),
            }),
            None => Lookup::Absent,
        })
    }

    async fn create(
        &self,
        entity: &EntityRef,
        document: &Value,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut state = self.lock();
        state.calls.push((Op::Create, entity.clone()));
        if let Some(error) = state.scripted_failure(Op::Create) {
            return Err(error);
        }
        if state.documents.contains_key(entity) {
            return Err(conflict(entity));
        }
        Ok(state.store(entity, document.clone()))
    }

    async fn update(
        &self,
        entity: &EntityRef,
        document: &Value,
        etag: Option<&str>,
    ) -> Result<RemoteDocument, RemoteError> {
        let mut state = self.lock();
        state.calls.push((Op::Update, entity.clone()));
        if let Some(error) = state.scripted_failure(Op::Update) {
            return Err(error);
        }
        if let Some(patch) = state.interference.remove(entity) {
            let mut current = state.documents.get(entity).cloned().unwrap_or_default();
            if let (Value::Object(current_map), Value::Object(patch_map)) = (&mut current, patch) {
                current_map.extend(patch_map);
            }
            state.store(entity, current);
        }
        let current_etag = match state.documents.get(entity) {
            Some(body) => body.get("etag").and_then(Value::as_str).map(str::to_string),
            None => {
                return Err(RemoteError::Rejected {
                    status: 404,
                    message: format!("{entity} not found"),
                })
            }
        };
        if etag.is_some() && etag.map(str::to_string) != current_etag {
            return Err(conflict(entity));
        }
        Ok(state.store(entity, document.clone()))
    }

    async fn delete(&self, entity: &EntityRef) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push((Op::Delete, entity.clone()));
        if let Some(error) = state.scripted_failure(Op::Delete) {
            return Err(error);
        }
        state.documents.remove(entity);
        Ok(())
    }
}

/// Connector handing out the shared [`FakeRemote`]
#[derive(Debug)]
pub struct FakeConnector {
    remote: Arc<FakeRemote>,
    connections: Mutex<Vec<RemoteConnection>>,
}

impl FakeConnector {
    pub fn new(remote: &Arc<FakeRemote>) -> Arc<Self> {
        Arc::new(Self {
            remote: Arc::clone(remote),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn connections(&self) -> Vec<RemoteConnection> {
        self.connections.lock().unwrap().clone()
    }
}

impl RemoteConnector for FakeConnector {
    fn connect(&self, connection: &RemoteConnection) -> Result<Arc<dyn RemoteClient>, RemoteError> {
        self.connections.lock().unwrap().push(connection.clone());
        Ok(Arc::clone(&self.remote) as Arc<dyn RemoteClient>)
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledGateway {
    pub labels: BTreeMap<String, String>,
    pub spec: GatewayInstallSpec,
}

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<(String, String), Service>,
    mirrors: Vec<XcpWorkspace>,
    annotation_patches: Vec<(String, String, BTreeMap<String, Option<String>>)>,
    ensured: Vec<String>,
    gateway_installs: BTreeMap<(String, String), InstalledGateway>,
    finalizers: Vec<String>,
    statuses: Vec<AgentConfigStatus>,
}

/// Kubernetes API keeping objects in memory and recording every write
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn put_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.lock().namespaces.insert(name, namespace);
    }

    pub fn remove_namespace(&self, name: &str) {
        self.lock().namespaces.remove(name);
    }

    pub fn put_service(&self, service: Service) {
        let key = (
            service.metadata.namespace.clone().unwrap_or_default(),
            service.metadata.name.clone().unwrap_or_default(),
        );
        self.lock().services.insert(key, service);
    }

    pub fn remove_service(&self, namespace: &str, name: &str) {
        self.lock()
            .services
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn put_mirror(&self, mirror: XcpWorkspace) {
        self.lock().mirrors.push(mirror);
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.lock().namespaces.get(name).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current annotations of a service, after every patch
    pub fn service_annotations(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.service(namespace, name)
            .and_then(|s| s.metadata.annotations)
            .unwrap_or_default()
    }

    pub fn annotation_patches(&self) -> usize {
        self.lock().annotation_patches.len()
    }

    pub fn ensured_namespaces(&self) -> Vec<String> {
        self.lock().ensured.clone()
    }

    pub fn gateway_install(&self, namespace: &str, name: &str) -> Option<InstalledGateway> {
        self.lock()
            .gateway_installs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn finalizers(&self) -> Vec<String> {
        self.lock().finalizers.clone()
    }

    pub fn statuses(&self) -> Vec<AgentConfigStatus> {
        self.lock().statuses.clone()
    }

    pub fn last_status(&self) -> Option<AgentConfigStatus> {
        self.lock().statuses.last().cloned()
    }
}

fn labels_match(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return false;
    };
    labels.and_then(|l| l.get(key)).is_some_and(|v| v == value)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_namespaces(&self, selector: Option<&str>) -> Result<Vec<Namespace>, ClusterError> {
        Ok(self
            .lock()
            .namespaces
            .values()
            .filter(|ns| selector.is_none_or(|s| labels_match(ns.metadata.labels.as_ref(), s)))
            .cloned()
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        Ok(self.lock().namespaces.get(name).cloned())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        Ok(self
            .lock()
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, service)| service.clone())
            .collect())
    }

    async fn annotate_service(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, Option<String>>,
    ) -> Result<(), ClusterError> {
        let mut state = self.lock();
        let key = (namespace.to_string(), name.to_string());
        let Some(service) = state.services.get_mut(&key) else {
            return Err(ClusterError::NotFound {
                kind: "Service",
                name: name.to_string(),
            });
        };
        let current = service.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (k, v) in &annotations {
            match v {
                Some(value) => {
                    current.insert(k.clone(), value.clone());
                }
                None => {
                    current.remove(k);
                }
            }
        }
        state
            .annotation_patches
            .push((namespace.to_string(), name.to_string(), annotations));
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str, meta: &NamespaceMeta) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.ensured.push(name.to_string());
        let entry = state
            .namespaces
            .entry(name.to_string())
            .or_insert_with(|| namespace(name, &[]));
        entry
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(meta.labels.clone());
        entry
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(meta.annotations.clone());
        Ok(())
    }

    async fn apply_gateway_install(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
        spec: &GatewayInstallSpec,
    ) -> Result<(), ClusterError> {
        self.lock().gateway_installs.insert(
            (namespace.to_string(), name.to_string()),
            InstalledGateway {
                labels,
                spec: spec.clone(),
            },
        );
        Ok(())
    }

    async fn list_workspace_mirrors(
        &self,
        namespace: &str,
    ) -> Result<Vec<XcpWorkspace>, ClusterError> {
        Ok(self
            .lock()
            .mirrors
            .iter()
            .filter(|m| m.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn add_config_finalizer(&self, _name: &str, finalizer: &str) -> Result<(), ClusterError> {
        self.lock().finalizers.push(finalizer.to_string());
        Ok(())
    }

    async fn remove_config_finalizer(
        &self,
        _name: &str,
        finalizer: &str,
    ) -> Result<(), ClusterError> {
        self.lock().finalizers.retain(|f| f != finalizer);
        Ok(())
    }

    async fn patch_config_status(
        &self,
        _name: &str,
        status: &AgentConfigStatus,
    ) -> Result<(), ClusterError> {
        self.lock().statuses.push(status.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(string_map(labels)),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn service(
    namespace: &str,
    name: &str,
    annotations: &[(&str, &str)],
    ports: &[(&str, i32)],
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(string_map(annotations)),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| ServicePort {
                        name: Some((*port_name).to_string()),
                        port: *port,
                        ..ServicePort::default()
                    })
                    .collect(),
            ),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

pub fn agent_config(name: &str, generation: i64, discovery_label: &str) -> AgentConfig {
    let mut config = AgentConfig::new(
        name,
        AgentConfigSpec {
            discovery_label: discovery_label.to_string(),
            tetrate: TetrateSpec {
                endpoint: Some("https://tsb.example.com:8443".to_string()),
                api_token: Some("test-token".to_string()),
                cluster_name: Some(CLUSTER.to_string()),
                ..TetrateSpec::default()
            },
        },
    );
    config.metadata.generation = Some(generation);
    config
}

pub fn mirror(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> XcpWorkspace {
    let mut mirror = XcpWorkspace::new(name, WorkspaceMirrorSpec::default());
    mirror.metadata.namespace = Some("tsb".to_string());
    mirror.metadata.labels = Some(string_map(labels));
    mirror.metadata.annotations = Some(string_map(annotations));
    mirror
}

/// Defaults with millisecond backoffs
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        periodic_idle: Duration::ZERO,
        ..ControllerConfig::default()
    }
}

/// Reconciler wired to fresh fakes
pub struct Harness {
    pub reconciler: Arc<Reconciler>,
    pub cluster: Arc<FakeCluster>,
    pub remote: Arc<FakeRemote>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let cluster = FakeCluster::new();
        let remote = FakeRemote::new();
        let connector = FakeConnector::new(&remote);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster) as Arc<dyn ClusterClient>,
            Arc::clone(&connector) as Arc<dyn RemoteConnector>,
            config,
        ));
        Self {
            reconciler,
            cluster,
            remote,
            connector,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new(test_config())
    }
}
