//! # Service Exposure
//!
//! Turns services annotated `arca.io/expose: "true"` into routes on the
//! namespace's remote gateway and reports the outcome back on each service.
//!
//! | Annotation        | Meaning                                            |
//! |-------------------|----------------------------------------------------|
//! | `arca.io/expose`  | literal `"true"` makes the service a candidate     |
//! | `arca.io/domain`  | public hostname, required                          |
//! | `arca.io/path`    | path prefix, default `/`                           |
//! | `arca.io/port`    | port name or number, default the first port        |
//!
//! The route table is recomputed from every candidate of the namespace on each
//! pass and replaces the gateway's `http` list as a whole.

use super::agent_config::report_auth_failure;
use super::dispatch::{ClusterObject, EventType, ResourceEvent};
use super::namespace::{gateway_group_name, gateway_name};
use super::sync::create_or_update;
use super::types::{Reconciler, ReconcilerError};
use crate::constants::{
    ANNOTATION_DOMAIN, ANNOTATION_EXPOSE, ANNOTATION_EXPOSURE_ERROR, ANNOTATION_EXPOSURE_STATUS,
    ANNOTATION_EXPOSURE_URL, ANNOTATION_PATH, ANNOTATION_PORT, LABEL_MANAGED, LABEL_NAMESPACE,
};
use crate::controller::store::ActiveConfig;
use crate::observability::metrics;
use crate::provider::EntityRef;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

const DEFAULT_PATH: &str = "/";
const GATEWAY_HTTP_PORT: i32 = 80;

/// Per-service configuration problems; reported on the service, never retried
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExposureError {
    #[error("missing required annotation arca.io/domain")]
    MissingDomain,
    #[error("service has no ports")]
    NoPorts,
    #[error("port '{0}' does not name a port of the service")]
    UnknownPort(String),
    #[error("route {hostname}{path} is already served by service '{owner}'")]
    DuplicateRoute {
        hostname: String,
        path: String,
        owner: String,
    },
}

/// A (hostname, path prefix) to (service, port) mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub hostname: String,
    pub path: String,
    pub service: String,
    pub port: i32,
}

impl Route {
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}{}", self.hostname, self.path)
    }
}

/// Result of one exposure attempt for one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposureStatus {
    Exposed { url: String },
    Error(String),
}

impl ExposureStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureStatus::Exposed { .. } => "exposed",
            ExposureStatus::Error(_) => "error",
        }
    }

    fn annotations(&self) -> BTreeMap<String, Option<String>> {
        let (url, error) = match self {
            ExposureStatus::Exposed { url } => (Some(url.clone()), None),
            ExposureStatus::Error(message) => (None, Some(message.clone())),
        };
        BTreeMap::from([
            (
                ANNOTATION_EXPOSURE_STATUS.to_string(),
                Some(self.as_str().to_string()),
            ),
            (ANNOTATION_EXPOSURE_URL.to_string(), url),
            (ANNOTATION_EXPOSURE_ERROR.to_string(), error),
        ])
    }
}

/// Outcome of one namespace exposure pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposureSummary {
    pub exposed: usize,
    pub errors: usize,
    /// Final status of every candidate, by service name
    pub statuses: BTreeMap<String, ExposureStatus>,
}

fn is_candidate(service: &Service) -> bool {
    service
        .annotations()
        .get(ANNOTATION_EXPOSE)
        .is_some_and(|v| v == "true")
}

fn has_exposure_status(service: &Service) -> bool {
    service.annotations().contains_key(ANNOTATION_EXPOSURE_STATUS)
}

/// Route requested by a service, `None` when it is not a candidate
#[must_use]
pub fn requested_route(service: &Service) -> Option<Result<Route, ExposureError>> {
    if !is_candidate(service) {
        return None;
    }
    Some(build_route(service))
}

fn build_route(service: &Service) -> Result<Route, ExposureError> {
    let annotations = service.annotations();
    let hostname = annotations
        .get(ANNOTATION_DOMAIN)
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .ok_or(ExposureError::MissingDomain)?
        .to_string();
    let path = annotations
        .get(ANNOTATION_PATH)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map_or_else(
            || DEFAULT_PATH.to_string(),
            |p| {
                if p.starts_with('/') {
                    p.to_string()
                } else {
                    format!("/{p}")
                }
            },
        );

    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let port = match annotations.get(ANNOTATION_PORT).map(|p| p.trim()) {
        Some(wanted) if !wanted.is_empty() => ports
            .iter()
            .find(|p| p.name.as_deref() == Some(wanted) || p.port.to_string() == wanted)
            .map(|p| p.port)
            .ok_or_else(|| ExposureError::UnknownPort(wanted.to_string()))?,
        _ => ports.first().map(|p| p.port).ok_or(ExposureError::NoPorts)?,
    };

    Ok(Route {
        hostname,
        path,
        service: service.name_any(),
        port,
    })
}

/// Desired gateway document for a namespace's route table
#[must_use]
pub fn desired_gateway(namespace: &str, routes: &[Route]) -> Value {
    let mut by_host: BTreeMap<&str, Vec<&Route>> = BTreeMap::new();
    for route in routes {
        by_host.entry(route.hostname.as_str()).or_default().push(route);
    }

    let http: Vec<Value> = by_host
        .into_iter()
        .map(|(hostname, mut host_routes)| {
            // Longest prefix first
            host_routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then(a.path.cmp(&b.path)));
            let rules: Vec<Value> = host_routes
                .iter()
                .map(|route| {
                    json!({
                        "match": [{ "uri": { "prefix": route.path } }],
                        "route": {
                            "serviceDestination": {
                                "host": format!(
                                    "{namespace}/{}.{namespace}.svc.cluster.local",
                                    route.service
                                ),
                                "port": route.port,
                            }
                        }
                    })
                })
                .collect();
            json!({
                "name": hostname.replace('.', "-"),
                "port": GATEWAY_HTTP_PORT,
                "hostname": hostname,
                "routing": { "rules": rules },
            })
        })
        .collect();

    json!({
        "displayName": gateway_name(namespace),
        "workloadSelector": {
            "namespace": namespace,
            "labels": { "app": gateway_name(namespace) },
        },
        "http": http,
        "configGenerationMetadata": {
            "labels": { LABEL_MANAGED: "true", LABEL_NAMESPACE: namespace }
        },
    })
}

/// Collect the namespace's route table and per-service statuses
///
/// Services are visited in name order so a duplicate route always loses to
/// the same owner.
fn plan_routes(services: &[Service]) -> (Vec<Route>, BTreeMap<String, ExposureStatus>) {
    let mut sorted: Vec<&Service> = services.iter().collect();
    sorted.sort_by_key(|s| s.name_any());

    let mut routes: Vec<Route> = Vec::new();
    let mut statuses = BTreeMap::new();
    for service in sorted {
        let Some(requested) = requested_route(service) else {
            continue;
        };
        let status = match requested {
            Ok(route) => match routes
                .iter()
                .find(|r| r.hostname == route.hostname && r.path == route.path)
            {
                Some(owner) => ExposureStatus::Error(
                    ExposureError::DuplicateRoute {
                        hostname: route.hostname.clone(),
                        path: route.path.clone(),
                        owner: owner.service.clone(),
                    }
                    .to_string(),
                ),
                None => {
                    let status = ExposureStatus::Exposed { url: route.url() };
                    routes.push(route);
                    status
                }
            },
            Err(e) => ExposureStatus::Error(e.to_string()),
        };
        statuses.insert(service.name_any(), status);
    }
    (routes, statuses)
}

/// Push the namespace's route table and annotate every affected service
///
/// # Errors
/// The gateway sync error; services that would have been exposed are
/// annotated with it first
pub async fn expose_namespace(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    namespace: &str,
) -> Result<ExposureSummary, ReconcilerError> {
    let span = info_span!("service.expose", namespace = %namespace);
    expose_inner(reconciler, active, namespace)
        .instrument(span)
        .await
}

async fn expose_inner(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    namespace: &str,
) -> Result<ExposureSummary, ReconcilerError> {
    let services = reconciler.cluster.list_services(namespace).await?;
    let (routes, mut statuses) = plan_routes(&services);

    let sync = push_routes(reconciler, active, namespace, &routes).await;
    if let Err(e) = &sync {
        for status in statuses.values_mut() {
            if matches!(status, ExposureStatus::Exposed { .. }) {
                *status = ExposureStatus::Error(e.to_string());
            }
        }
    }

    let mut summary = ExposureSummary::default();
    for service in &services {
        let name = service.name_any();
        let changes = match statuses.get(&name) {
            Some(status) => {
                match status {
                    ExposureStatus::Exposed { .. } => summary.exposed += 1,
                    ExposureStatus::Error(_) => summary.errors += 1,
                }
                status.annotations()
            }
            // No longer a candidate
            None if has_exposure_status(service) => BTreeMap::from([
                (ANNOTATION_EXPOSURE_STATUS.to_string(), None),
                (ANNOTATION_EXPOSURE_URL.to_string(), None),
                (ANNOTATION_EXPOSURE_ERROR.to_string(), None),
            ]),
            None => continue,
        };
        if annotations_current(service, &changes) {
            continue;
        }
        if let Some(status) = statuses.get(&name) {
            metrics::record_exposure(status.as_str());
            match status {
                ExposureStatus::Exposed { url } => {
                    info!(service = %name, url = %url, "Service exposed");
                }
                ExposureStatus::Error(message) => {
                    warn!(service = %name, "Service exposure failed: {}", message);
                }
            }
        }
        if let Err(e) = reconciler
            .cluster
            .annotate_service(namespace, &name, changes)
            .await
        {
            warn!(service = %name, "Failed to write exposure status: {}", e);
        }
    }

    summary.statuses = statuses;
    sync.map(|()| summary)
}

/// Whether the service already carries exactly these annotation values
fn annotations_current(service: &Service, changes: &BTreeMap<String, Option<String>>) -> bool {
    let current = service.annotations();
    changes
        .iter()
        .all(|(key, value)| current.get(key) == value.as_ref())
}

async fn push_routes(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    namespace: &str,
    routes: &[Route],
) -> Result<(), ReconcilerError> {
    let entity = EntityRef::gateway(namespace, gateway_group_name(namespace), gateway_name(namespace));
    // An empty table only matters for a gateway that already exists
    if routes.is_empty() && active.remote.get(&entity).await?.is_absent() {
        debug!(namespace = %namespace, "No exposed services and no gateway, nothing to do");
        return Ok(());
    }
    create_or_update(
        active.remote.as_ref(),
        &entity,
        &desired_gateway(namespace, routes),
        &reconciler.config.retry,
        reconciler.ledger.as_ref(),
    )
    .await?;
    Ok(())
}

/// Run the namespace exposure pass on behalf of one service
///
/// Returns `None` when the service neither asks for exposure nor carries a
/// stale exposure status.
///
/// # Errors
/// See [`expose_namespace`]
pub async fn expose_if_annotated(
    reconciler: &Reconciler,
    active: &ActiveConfig,
    service: &Service,
    namespace: &str,
) -> Result<Option<ExposureStatus>, ReconcilerError> {
    if !is_candidate(service) && !has_exposure_status(service) {
        return Ok(None);
    }
    let mut summary = expose_namespace(reconciler, active, namespace).await?;
    Ok(summary.statuses.remove(&service.name_any()))
}

async fn namespace_selected(
    reconciler: &Reconciler,
    namespace: &str,
) -> Result<bool, ReconcilerError> {
    let labels = match reconciler.labels.get(namespace) {
        Some(labels) => labels,
        None => match reconciler.cluster.get_namespace(namespace).await? {
            Some(ns) => ns.labels().clone(),
            None => return Ok(false),
        },
    };
    Ok(!reconciler.index.matches(&labels).is_empty())
}

pub async fn on_service_event(
    reconciler: Arc<Reconciler>,
    event: ResourceEvent,
) -> Result<(), ReconcilerError> {
    let ClusterObject::Service(service) = event.object else {
        return Ok(());
    };
    let Some(namespace) = service.namespace() else {
        return Ok(());
    };
    // Deleted candidates only need their route dropped
    let relevant = is_candidate(&service)
        || (event.event_type != EventType::Deleted && has_exposure_status(&service));
    if !relevant {
        return Ok(());
    }
    if !namespace_selected(&reconciler, &namespace).await? {
        metrics::increment_filtered_events("service");
        debug!(service = %service.name_any(), namespace = %namespace, "Namespace not selected, skipping");
        return Ok(());
    }
    let active = match reconciler.store.active() {
        Ok(active) => active,
        Err(e) => {
            debug!(service = %service.name_any(), "Skipping service: {}", e);
            return Ok(());
        }
    };

    metrics::increment_reconciliations("service");
    let result = expose_namespace(&reconciler, &active, &namespace).await;
    if let Err(e) = &result {
        metrics::increment_reconciliation_errors("service");
        if e.is_auth() {
            report_auth_failure(&reconciler, e).await;
        }
    }
    result.map(|_| ())
}
