//! Handler-level reconciliation against an in-memory cluster and management plane

#[cfg(test)]
mod common;

use arca_controller::config::LabelRemovalPolicy;
use arca_controller::constants::{
    ANNOTATION_EXPOSE, ANNOTATION_EXPOSURE_ERROR, ANNOTATION_EXPOSURE_STATUS,
    ANNOTATION_EXPOSURE_URL, CONFIG_FINALIZER,
};
use arca_controller::controller::reconciler::agent_config::apply_config;
use arca_controller::controller::reconciler::namespace::handle_namespace;
use arca_controller::controller::reconciler::{
    periodic_pass, reconcile_all, reverse_sync_all, ClusterObject, DispatchTable, EventType,
    ResourceEvent, TriggerSource,
};
use arca_controller::crd::{AgentConfig, ConfigPhase, GatewayInstallSpec};
use arca_controller::provider::{EntityRef, RemoteClient};
use common::{
    agent_config, mirror, namespace, service, test_config, unauthorized, Harness, Op, SELECTOR,
};
use serde_json::json;
use std::sync::Arc;

fn workspace() -> EntityRef {
    EntityRef::workspace("pay-ns")
}

fn gateway() -> EntityRef {
    EntityRef::gateway("pay-ns", "pay-ns-gateways", "pay-ns-gateway")
}

fn exposed_web() -> k8s_openapi::api::core::v1::Service {
    service(
        "pay-ns",
        "web",
        &[
            (ANNOTATION_EXPOSE, "true"),
            ("arca.io/domain", "pay.example.com"),
        ],
        &[("http", 8080)],
    )
}

async fn dispatch(h: &Harness, event_type: EventType, object: ClusterObject) {
    DispatchTable::new()
        .dispatch(
            Arc::clone(&h.reconciler),
            ResourceEvent { event_type, object },
        )
        .await
        .unwrap();
}

async fn configured(h: &Harness) {
    apply_config(&h.reconciler, &agent_config("default", 1, SELECTOR))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unselected_namespace_makes_no_remote_calls() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("billing", &[("team", "billing")]));
    configured(&h).await;

    handle_namespace(&h.reconciler, &namespace("billing", &[("team", "billing")]))
        .await
        .unwrap();

    assert!(h.remote.calls().is_empty());
    let status = h.cluster.last_status().unwrap();
    assert_eq!(status.phase, Some(ConfigPhase::Ready));
    assert_eq!(status.last_pass_synced, Some(0));
}

#[tokio::test]
async fn test_config_applied_creates_workspace_tree() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;

    let stored = h.remote.document(&workspace()).unwrap();
    assert_eq!(stored["namespaceSelector"]["names"], json!(["east/pay-ns"]));
    assert!(h.remote.contains(&EntityRef::setting("pay-ns", "default")));
    let group = h
        .remote
        .document(&EntityRef::gateway_group("pay-ns", "pay-ns-gateways"))
        .unwrap();
    assert_eq!(group["configMode"], "BRIDGED");
    // Nothing to expose and no gateway yet
    assert!(!h.remote.contains(&gateway()));

    assert_eq!(h.cluster.finalizers(), vec![CONFIG_FINALIZER.to_string()]);
    let status = h.cluster.last_status().unwrap();
    assert_eq!(status.phase, Some(ConfigPhase::Ready));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.last_pass_synced, Some(1));

    let connections = h.connector.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].endpoint, "https://tsb.example.com:8443");
    assert_eq!(connections[0].tenant, "arca");
}

#[tokio::test]
async fn test_same_generation_is_applied_once() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    let statuses = h.cluster.statuses().len();
    h.remote.clear_calls();

    configured(&h).await;

    assert!(h.remote.calls().is_empty());
    assert_eq!(h.cluster.statuses().len(), statuses);
}

#[tokio::test]
async fn test_namespace_gaining_label_is_synced() {
    let h = Harness::default();
    configured(&h).await;
    assert!(h.remote.calls().is_empty());

    let labelled = namespace("pay-ns", &[("team", "payments")]);
    h.cluster.put_namespace(labelled.clone());
    dispatch(&h, EventType::Modified, ClusterObject::Namespace(labelled)).await;

    assert!(h.remote.contains(&workspace()));
}

#[tokio::test]
async fn test_relabel_retains_workspace_and_is_not_recreated() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    handle_namespace(&h.reconciler, &namespace("pay-ns", &[("team", "payments")]))
        .await
        .unwrap();

    let relabelled = namespace("pay-ns", &[("team", "other")]);
    h.cluster.put_namespace(relabelled.clone());
    h.remote.clear_calls();
    handle_namespace(&h.reconciler, &relabelled).await.unwrap();

    assert_eq!(h.remote.count(Op::Delete), 0);
    assert!(h.remote.contains(&workspace()));

    // Removed out of band; the next pass must not bring it back
    h.remote.delete(&workspace()).await.unwrap();
    h.remote.clear_calls();
    let summary = reconcile_all(&h.reconciler, TriggerSource::Periodic)
        .await
        .unwrap();

    assert_eq!(summary.synced, 0);
    assert!(h.remote.calls().is_empty());
    assert!(!h.remote.contains(&workspace()));
}

#[tokio::test]
async fn test_relabel_under_delete_policy_removes_remote_tree() {
    let mut config = test_config();
    config.label_removal_policy = LabelRemovalPolicy::Delete;
    let h = Harness::new(config);
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    handle_namespace(&h.reconciler, &namespace("pay-ns", &[("team", "payments")]))
        .await
        .unwrap();

    handle_namespace(&h.reconciler, &namespace("pay-ns", &[]))
        .await
        .unwrap();

    assert_eq!(h.remote.count(Op::Delete), 4);
    assert!(!h.remote.contains(&workspace()));
    assert!(!h
        .remote
        .contains(&EntityRef::gateway_group("pay-ns", "pay-ns-gateways")));
}

#[tokio::test]
async fn test_fabric_adds_second_selector_dimension() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    let mut config = agent_config("default", 1, SELECTOR);
    config.spec.tetrate.fabric_name = Some("mesh".to_string());

    apply_config(&h.reconciler, &config).await.unwrap();

    let stored = h.remote.document(&workspace()).unwrap();
    assert_eq!(
        stored["namespaceSelector"]["names"],
        json!(["east/pay-ns", "mesh/pay-ns"])
    );
    let group = h
        .remote
        .document(&EntityRef::gateway_group("pay-ns", "pay-ns-gateways"))
        .unwrap();
    assert_eq!(
        group["namespaceSelector"]["names"],
        json!(["east/pay-ns", "mesh/pay-ns"])
    );
}

#[tokio::test]
async fn test_invalid_selector_fails_and_is_not_retried() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    let broken = agent_config("default", 1, "team");

    assert!(apply_config(&h.reconciler, &broken).await.is_err());
    let status = h.cluster.last_status().unwrap();
    assert_eq!(status.phase, Some(ConfigPhase::Failed));
    assert_eq!(status.observed_generation, Some(1));
    assert!(h.reconciler.store.active().is_err());

    let statuses = h.cluster.statuses().len();
    apply_config(&h.reconciler, &broken).await.unwrap();
    assert_eq!(h.cluster.statuses().len(), statuses);
    assert!(h.connector.connections().is_empty());

    // A new generation is evaluated again
    apply_config(&h.reconciler, &agent_config("default", 2, SELECTOR))
        .await
        .unwrap();
    assert_eq!(
        h.cluster.last_status().unwrap().phase,
        Some(ConfigPhase::Ready)
    );
    assert!(h.remote.contains(&workspace()));
}

#[tokio::test]
async fn test_other_config_names_are_ignored() {
    let h = Harness::default();
    apply_config(&h.reconciler, &agent_config("staging", 1, SELECTOR))
        .await
        .unwrap();

    assert!(h.reconciler.store.active().is_err());
    assert!(h.cluster.statuses().is_empty());
    assert!(h.cluster.finalizers().is_empty());
}

#[tokio::test]
async fn test_deleting_config_releases_finalizer_and_suspends() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    assert!(h.reconciler.store.active().is_ok());

    let deleting: AgentConfig = serde_json::from_value(json!({
        "apiVersion": "operator.arca.io/v1alpha1",
        "kind": "AgentConfig",
        "metadata": {
            "name": "default",
            "generation": 1,
            "finalizers": [CONFIG_FINALIZER],
            "deletionTimestamp": "2026-01-01T00:00:00Z"
        },
        "spec": { "discoveryLabel": SELECTOR }
    }))
    .unwrap();
    h.remote.clear_calls();
    dispatch(&h, EventType::Modified, ClusterObject::AgentConfig(deleting)).await;

    assert!(h.cluster.finalizers().is_empty());
    assert!(h.reconciler.store.active().is_err());
    // Remote workspaces are left alone
    assert_eq!(h.remote.writes(), 0);
    assert!(h.remote.contains(&workspace()));

    h.remote.clear_calls();
    handle_namespace(&h.reconciler, &namespace("pay-ns", &[("team", "payments")]))
        .await
        .unwrap();
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_mirror_creates_namespace_and_gateway_install() {
    let h = Harness::default();
    configured(&h).await;
    h.cluster.put_mirror(mirror(
        "pay-ws",
        &[("arca.io/managed", "true"), ("arca.io/namespace", "pay-ns")],
        &[
            ("tsb.tetrate.io/fqn", "organizations/tetrate/tenants/arca/workspaces/pay-ws"),
            ("tsb.tetrate.io/config-mode", "BRIDGED"),
        ],
    ));
    h.cluster
        .put_mirror(mirror("foreign", &[("arca.io/namespace", "x")], &[]));

    let synced = reverse_sync_all(&h.reconciler).await.unwrap();

    assert_eq!(synced, 1);
    assert_eq!(h.cluster.ensured_namespaces(), vec!["pay-ns".to_string()]);
    let ns = h.cluster.namespace("pay-ns").unwrap();
    let labels = ns.metadata.labels.unwrap();
    assert_eq!(labels.get("arca.io/managed").map(String::as_str), Some("true"));
    assert_eq!(labels.get("arca.io/workspace").map(String::as_str), Some("pay-ws"));
    let annotations = ns.metadata.annotations.unwrap();
    assert_eq!(
        annotations.get("arca.io/workspace-fqn").map(String::as_str),
        Some("organizations/tetrate/tenants/arca/workspaces/pay-ws")
    );
    assert_eq!(
        annotations.get("arca.io/config-mode").map(String::as_str),
        Some("BRIDGED")
    );

    let install = h.cluster.gateway_install("pay-ns", "pay-ns-gateway").unwrap();
    assert_eq!(install.spec, GatewayInstallSpec::unified_load_balancer());
    assert_eq!(
        install.labels.get("arca.io/namespace").map(String::as_str),
        Some("pay-ns")
    );
    assert!(h.cluster.namespace("x").is_none());
}

#[tokio::test]
async fn test_mirror_without_configuration_is_ignored() {
    let h = Harness::default();
    let managed = mirror(
        "pay-ws",
        &[("arca.io/managed", "true"), ("arca.io/namespace", "pay-ns")],
        &[],
    );
    h.cluster.put_mirror(managed.clone());

    dispatch(&h, EventType::Added, ClusterObject::WorkspaceMirror(managed)).await;
    assert_eq!(reverse_sync_all(&h.reconciler).await.unwrap(), 0);

    assert!(h.cluster.ensured_namespaces().is_empty());
    assert!(h.cluster.namespace("pay-ns").is_none());
    assert!(h.cluster.gateway_install("pay-ns", "pay-ns-gateway").is_none());
}

#[tokio::test]
async fn test_stale_namespace_event_acts_on_current_labels() {
    let h = Harness::default();
    configured(&h).await;
    // The label was already removed when the earlier ADD is handled
    h.cluster.put_namespace(namespace("pay-ns", &[]));

    let stale = namespace("pay-ns", &[("team", "payments")]);
    dispatch(&h, EventType::Added, ClusterObject::Namespace(stale)).await;
    dispatch(
        &h,
        EventType::Modified,
        ClusterObject::Namespace(namespace("pay-ns", &[])),
    )
    .await;

    assert!(!h.remote.contains(&workspace()));
    assert!(h.remote.calls().is_empty());
    assert_eq!(
        h.reconciler.labels.get("pay-ns"),
        Some(std::collections::BTreeMap::new())
    );
}

#[tokio::test]
async fn test_stale_unlabelled_event_still_syncs_labelled_namespace() {
    let h = Harness::default();
    configured(&h).await;
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));

    dispatch(
        &h,
        EventType::Modified,
        ClusterObject::Namespace(namespace("pay-ns", &[])),
    )
    .await;

    assert!(h.remote.contains(&workspace()));
    let cached = h.reconciler.labels.get("pay-ns").unwrap();
    assert_eq!(cached.get("team").map(String::as_str), Some("payments"));
}

#[tokio::test]
async fn test_event_for_vanished_namespace_is_treated_as_removal() {
    let mut config = test_config();
    config.label_removal_policy = LabelRemovalPolicy::Delete;
    let h = Harness::new(config);
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    assert!(h.remote.contains(&workspace()));
    h.cluster.remove_namespace("pay-ns");

    let stale = namespace("pay-ns", &[("team", "payments")]);
    dispatch(&h, EventType::Modified, ClusterObject::Namespace(stale)).await;

    assert!(!h.remote.contains(&workspace()));
    assert!(h.reconciler.labels.get("pay-ns").is_none());
}

#[tokio::test]
async fn test_annotated_service_is_exposed() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    h.cluster.put_service(exposed_web());
    h.cluster.put_service(service(
        "pay-ns",
        "admin",
        &[(ANNOTATION_EXPOSE, "true")],
        &[("http", 9090)],
    ));
    h.cluster
        .put_service(service("pay-ns", "internal", &[], &[("grpc", 7000)]));

    configured(&h).await;

    let web = h.cluster.service_annotations("pay-ns", "web");
    assert_eq!(
        web.get(ANNOTATION_EXPOSURE_STATUS).map(String::as_str),
        Some("exposed")
    );
    assert_eq!(
        web.get(ANNOTATION_EXPOSURE_URL).map(String::as_str),
        Some("http://pay.example.com/")
    );

    let admin = h.cluster.service_annotations("pay-ns", "admin");
    assert_eq!(
        admin.get(ANNOTATION_EXPOSURE_STATUS).map(String::as_str),
        Some("error")
    );
    assert!(admin
        .get(ANNOTATION_EXPOSURE_ERROR)
        .is_some_and(|e| e.contains("arca.io/domain")));
    assert!(!h
        .cluster
        .service_annotations("pay-ns", "internal")
        .contains_key(ANNOTATION_EXPOSURE_STATUS));

    let stored = h.remote.document(&gateway()).unwrap();
    let http = stored["http"].as_array().unwrap();
    assert_eq!(http.len(), 1);
    assert_eq!(http[0]["hostname"], "pay.example.com");
    assert_eq!(
        http[0]["routing"]["rules"][0]["route"]["serviceDestination"],
        json!({"host": "pay-ns/web.pay-ns.svc.cluster.local", "port": 8080})
    );
}

#[tokio::test]
async fn test_repeated_pass_leaves_exposure_untouched() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    h.cluster.put_service(exposed_web());
    configured(&h).await;
    let patches = h.cluster.annotation_patches();
    let writes = h.remote.writes();

    reconcile_all(&h.reconciler, TriggerSource::Periodic)
        .await
        .unwrap();

    assert_eq!(h.cluster.annotation_patches(), patches);
    assert_eq!(h.remote.writes(), writes);
}

#[tokio::test]
async fn test_unexposed_service_loses_route_and_status() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    h.cluster.put_service(exposed_web());
    configured(&h).await;

    let mut web = h.cluster.service("pay-ns", "web").unwrap();
    if let Some(annotations) = web.metadata.annotations.as_mut() {
        annotations.insert(ANNOTATION_EXPOSE.to_string(), "false".to_string());
    }
    h.cluster.put_service(web.clone());
    dispatch(&h, EventType::Modified, ClusterObject::Service(web)).await;

    let stored = h.remote.document(&gateway()).unwrap();
    assert_eq!(stored["http"], json!([]));
    let annotations = h.cluster.service_annotations("pay-ns", "web");
    assert!(!annotations.contains_key(ANNOTATION_EXPOSURE_STATUS));
    assert!(!annotations.contains_key(ANNOTATION_EXPOSURE_URL));
}

#[tokio::test]
async fn test_service_in_unselected_namespace_is_filtered() {
    let h = Harness::default();
    configured(&h).await;
    h.cluster
        .put_namespace(namespace("billing", &[("team", "billing")]));
    let svc = service(
        "billing",
        "web",
        &[
            (ANNOTATION_EXPOSE, "true"),
            ("arca.io/domain", "bill.example.com"),
        ],
        &[("http", 80)],
    );
    h.cluster.put_service(svc.clone());

    dispatch(&h, EventType::Added, ClusterObject::Service(svc)).await;

    assert!(h.remote.calls().is_empty());
    assert_eq!(h.cluster.annotation_patches(), 0);
}

#[tokio::test]
async fn test_auth_failure_marks_config_unusable() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    h.remote.fail_always(Op::Get, unauthorized());

    let result = apply_config(&h.reconciler, &agent_config("default", 1, SELECTOR)).await;

    assert!(result.is_err_and(|e| e.is_auth()));
    assert_eq!(
        h.cluster.last_status().unwrap().phase,
        Some(ConfigPhase::Unusable)
    );
    assert!(h.reconciler.store.is_unusable());
    assert_eq!(h.remote.count(Op::Get), 1);

    h.remote.clear_calls();
    handle_namespace(&h.reconciler, &namespace("pay-ns", &[("team", "payments")]))
        .await
        .unwrap();
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_periodic_pass_recreates_missing_workspace() {
    let h = Harness::default();
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    h.remote.delete(&workspace()).await.unwrap();

    let summary = periodic_pass(&h.reconciler).await.unwrap();

    assert_eq!(summary.synced, 1);
    assert_eq!(summary.failed, 0);
    assert!(h.remote.contains(&workspace()));
}

#[tokio::test]
async fn test_periodic_pass_waits_for_idle_window() {
    let mut config = test_config();
    config.periodic_idle = std::time::Duration::from_secs(60);
    let h = Harness::new(config);
    h.cluster
        .put_namespace(namespace("pay-ns", &[("team", "payments")]));
    configured(&h).await;
    h.remote.delete(&workspace()).await.unwrap();
    h.remote.clear_calls();

    assert!(periodic_pass(&h.reconciler).await.is_none());

    assert!(h.remote.calls().is_empty());
    assert!(!h.remote.contains(&workspace()));
}
