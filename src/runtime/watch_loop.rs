//! # Watch Loop
//!
//! One long-lived watch stream per resource kind feeding the dispatch table.
//!
//! - `AgentConfig` events are handled in order on the stream's own task.
//! - Namespace, service and workspace mirror events run on a worker pool
//!   bounded by `MAX_CONCURRENT_RECONCILIATIONS`.
//! - Streams restart after errors following the error policy.
//! - The periodic pass runs on its own task.

use crate::constants::DEFAULT_SHUTDOWN_GRACE_SECS;
use crate::controller::reconciler::{
    run_periodic, ClusterObject, DispatchTable, EventClassifier, Reconciler, ResourceEvent,
};
use crate::controller::server::ServerState;
use crate::crd::{AgentConfig, XcpWorkspace};
use crate::runtime::error_policy::{handle_event_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone)]
struct WatchContext {
    reconciler: Arc<Reconciler>,
    dispatch: Arc<DispatchTable>,
    classifier: Arc<EventClassifier>,
    workers: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
}

impl WatchContext {
    async fn handle(&self, event: ResourceEvent) {
        let span = tracing::span!(
            tracing::Level::INFO,
            "controller.event",
            kind = event.object.kind().as_str(),
            event = event.event_type.as_str(),
            object = %event.object.key()
        );
        let result = self
            .dispatch
            .dispatch(Arc::clone(&self.reconciler), event.clone())
            .instrument(span)
            .await;
        if let Err(e) = result {
            handle_event_error(&event, &e);
        }
    }

    /// Run the event on the worker pool, waiting for a free slot
    async fn spawn(&self, event: ResourceEvent) {
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!("Worker pool closed, dropping event: {}", e);
                return;
            }
        };
        let ctx = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            ctx.handle(event).await;
        });
    }
}

fn classify<K>(
    event: watcher::Event<K>,
    wrap: fn(K) -> ClusterObject,
    classifier: &EventClassifier,
) -> Option<ResourceEvent> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            Some(classifier.applied(wrap(obj)))
        }
        watcher::Event::Delete(obj) => Some(classifier.deleted(wrap(obj))),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Consume one resource kind until shutdown, restarting the stream as needed
async fn watch_kind<K>(
    stream_name: &'static str,
    api: Api<K>,
    wrap: fn(K) -> ClusterObject,
    ordered: bool,
    ctx: WatchContext,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let retry = &ctx.reconciler.config.retry;
    let backoff_start_ms = u64::try_from(retry.initial_backoff.as_millis()).unwrap_or(u64::MAX);
    let backoff_max_ms = u64::try_from(retry.max_backoff.as_millis()).unwrap_or(u64::MAX);
    let restart_delay = ctx.reconciler.config.watch_restart_delay;
    let backoff = Arc::new(AtomicU64::new(backoff_start_ms));

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        info!(stream = stream_name, "Starting watch stream");
        let mut stream = watcher(api.clone(), watcher::Config::default().any_semantic())
            .default_backoff()
            .boxed();

        while let Some(item) = stream.next().await {
            if ctx.shutdown.load(Ordering::Relaxed) {
                break;
            }
            match item {
                Ok(event) => {
                    backoff.store(backoff_start_ms, Ordering::Relaxed);
                    let Some(event) = classify(event, wrap, &ctx.classifier) else {
                        continue;
                    };
                    debug!(
                        stream = stream_name,
                        event = event.event_type.as_str(),
                        object = %event.object.key(),
                        "watch.event"
                    );
                    if ordered {
                        ctx.handle(event).await;
                    } else {
                        ctx.spawn(event).await;
                    }
                }
                Err(e) => {
                    let error_string = format!("{e:?}");
                    if handle_watch_stream_error(
                        stream_name,
                        &error_string,
                        &backoff,
                        backoff_max_ms,
                        restart_delay.as_secs(),
                    )
                    .await
                    .is_none()
                    {
                        break;
                    }
                }
            }
        }

        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        warn!(
            stream = stream_name,
            "Watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }
    debug!(stream = stream_name, "Watch stream stopped");
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Run every watch stream and the periodic task until a shutdown signal
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    let max_workers = reconciler.config.max_concurrent_reconciliations.max(1);
    let ctx = WatchContext {
        reconciler: Arc::clone(&reconciler),
        dispatch: Arc::new(DispatchTable::new()),
        classifier: Arc::new(EventClassifier::default()),
        workers: Arc::new(Semaphore::new(max_workers)),
        shutdown: Arc::new(AtomicBool::new(false)),
    };

    let mirror_namespace = reconciler.config.workspace_mirror_namespace.clone();
    let mut tasks = JoinSet::new();
    tasks.spawn(
        watch_kind(
            "agentconfigs",
            Api::<AgentConfig>::all(client.clone()),
            ClusterObject::AgentConfig,
            true,
            ctx.clone(),
        )
        .instrument(watch_span.clone()),
    );
    tasks.spawn(
        watch_kind(
            "namespaces",
            Api::<Namespace>::all(client.clone()),
            ClusterObject::Namespace,
            false,
            ctx.clone(),
        )
        .instrument(watch_span.clone()),
    );
    tasks.spawn(
        watch_kind(
            "services",
            Api::<Service>::all(client.clone()),
            ClusterObject::Service,
            false,
            ctx.clone(),
        )
        .instrument(watch_span.clone()),
    );
    tasks.spawn(
        watch_kind(
            "workspace-mirrors",
            Api::<XcpWorkspace>::namespaced(client, &mirror_namespace),
            ClusterObject::WorkspaceMirror,
            false,
            ctx.clone(),
        )
        .instrument(watch_span.clone()),
    );
    tasks.spawn(
        run_periodic(Arc::clone(&reconciler), Arc::clone(&ctx.shutdown))
            .instrument(watch_span.clone()),
    );
    info!(
        workers = max_workers,
        mirror_namespace = %mirror_namespace,
        "Controller watch loop running"
    );

    shutdown_signal().await;
    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
    ctx.shutdown.store(true, Ordering::Relaxed);
    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");

    let permits = u32::try_from(max_workers).unwrap_or(u32::MAX);
    let grace = Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS);
    match tokio::time::timeout(grace, ctx.workers.acquire_many(permits)).await {
        Ok(_) => info!("In-flight reconciliations finished"),
        Err(_) => warn!(
            "In-flight reconciliations still running after {}s, stopping anyway",
            grace.as_secs()
        ),
    }
    tasks.shutdown().await;

    info!("Controller stopped gracefully");
    Ok(())
}
