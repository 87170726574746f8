//! # Error Policy
//!
//! Handling of watch stream errors and failed event handlers.

use crate::controller::reconciler::{ReconcilerError, ResourceEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn, Instrument};

/// Watch stream failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    TooManyRequests,
    NotFound,
    Other,
}

/// Classify a watch error by its debug rendering
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorKind::Unauthorized
    } else if is_410 {
        WatchErrorKind::Expired
    } else if is_429 {
        WatchErrorKind::TooManyRequests
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch error and decide whether the stream keeps going
///
/// Returns `Some(())` to continue consuming the stream and `None` to restart
/// it. 429s grow `backoff` (milliseconds) up to `max_backoff_ms`.
pub async fn handle_watch_stream_error(
    stream: &str,
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        stream = stream,
        error = %error_string
    );
    react_to_watch_error(error_string, backoff, max_backoff_ms, watch_restart_delay_secs)
        .instrument(error_span)
        .await
}

async fn react_to_watch_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired"
            );
            error!("Check the ClusterRole and ClusterRoleBinding of the arca-controller service account:");
            error!("   kubectl auth can-i watch namespaces --as=system:serviceaccount:<namespace>:arca-controller");
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay_secs
            );
            tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(
                error_type = "410",
                "Watch resource version expired, this is normal during pod restarts, watch will restart"
            );
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(std::time::Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            let resource_info = if error_string.contains("integer `404`") {
                "CRD or resource may have been deleted (404 returned as plain text)"
            } else if error_string.contains("AgentConfig") {
                "AgentConfig resource"
            } else if error_string.contains("Workspace") {
                "Workspace mirror resource"
            } else {
                "Resource"
            };
            warn!(
                "{} not found (404), this may be normal if the resource was deleted or the CRD is missing. Error: {}",
                resource_info, error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Watch stream error: {}", error_string);
            tokio::time::sleep(std::time::Duration::from_secs(watch_restart_delay_secs)).await;
            None
        }
    }
}

/// Log a failed handler; the next event or periodic pass retries it
pub fn handle_event_error(event: &ResourceEvent, error: &ReconcilerError) {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.event.error",
        kind = event.object.kind().as_str(),
        event = event.event_type.as_str(),
        object = %event.object.key(),
        error = %error
    );
    let _error_guard = error_span.enter();

    if error.is_auth() {
        error!("Tetrate API rejected the configured credentials: {}", error);
    } else {
        error!("Reconciliation failed: {}", error);
    }
}
