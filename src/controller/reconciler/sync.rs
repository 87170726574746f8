//! # Create-or-Update
//!
//! Idempotent write protocol for remote entities:
//!
//! 1. GET the entity.
//! 2. Absent: POST the full desired document.
//! 3. Present: merge the desired fragment into it, keeping the etag. Skip the
//!    write when nothing changed, otherwise PUT with `If-Match`.
//! 4. Conflicts and transient failures refetch and retry with exponential
//!    backoff, up to the configured number of attempts.
//!
//! Authentication failures end the pass immediately.

use super::types::{SyncLedger, SyncState};
use crate::config::RetryPolicy;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::merge::merge;
use crate::observability::metrics;
use crate::provider::{EntityRef, Lookup, RemoteClient, RemoteDocument, RemoteError};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What a successful pass did
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Created(RemoteDocument),
    Updated(RemoteDocument),
    /// Remote state already contained the desired fragment
    Unchanged(RemoteDocument),
}

impl SyncOutcome {
    #[must_use]
    pub fn document(&self) -> &RemoteDocument {
        match self {
            SyncOutcome::Created(doc) | SyncOutcome::Updated(doc) | SyncOutcome::Unchanged(doc) => {
                doc
            }
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created(_) => "created",
            SyncOutcome::Updated(_) => "updated",
            SyncOutcome::Unchanged(_) => "unchanged",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("{entity}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        entity: String,
        attempts: u32,
        last: RemoteError,
    },
    #[error("{entity}: {source}")]
    Auth { entity: String, source: RemoteError },
    #[error("{entity}: {source}")]
    Failed { entity: String, source: RemoteError },
}

impl SyncError {
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth { .. })
    }
}

/// One GET / merge / write attempt
async fn attempt(
    remote: &dyn RemoteClient,
    entity: &EntityRef,
    desired: &Value,
    ledger: &SyncLedger,
) -> Result<SyncOutcome, RemoteError> {
    match remote.get(entity).await? {
        Lookup::Absent => {
            ledger.record(entity, SyncState::Absent);
            ledger.record(entity, SyncState::Syncing);
            let created = remote.create(entity, desired).await?;
            Ok(SyncOutcome::Created(created))
        }
        Lookup::Found(current) => {
            let merged = merge(&current.body, desired);
            if merged == current.body {
                return Ok(SyncOutcome::Unchanged(current));
            }
            ledger.record(entity, SyncState::Syncing);
            let updated = remote
                .update(entity, &merged, current.etag.as_deref())
                .await?;
            Ok(SyncOutcome::Updated(updated))
        }
    }
}

/// Drive `entity` towards `desired` under the retry policy
///
/// # Errors
/// [`SyncError::Auth`] on refused credentials, [`SyncError::Failed`] for
/// requests the server rejected outright, and [`SyncError::RetriesExhausted`]
/// once every attempt hit a conflict or transient failure
pub async fn create_or_update(
    remote: &dyn RemoteClient,
    entity: &EntityRef,
    desired: &Value,
    policy: &RetryPolicy,
    ledger: &SyncLedger,
) -> Result<SyncOutcome, SyncError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = ExponentialBackoff::from_policy(policy);
    ledger.record(entity, SyncState::DesiredKnown);

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match attempt(remote, entity, desired, ledger).await {
            Ok(outcome) => {
                ledger.record(entity, SyncState::Synced);
                match &outcome {
                    SyncOutcome::Unchanged(_) => debug!("{} already up to date", entity),
                    other => info!("{} {}", entity, other.as_str()),
                }
                return Ok(outcome);
            }
            Err(error) if error.is_auth() => {
                ledger.record(entity, SyncState::Failed);
                return Err(SyncError::Auth {
                    entity: entity.to_string(),
                    source: error,
                });
            }
            Err(error) if !error.is_retryable() => {
                ledger.record(entity, SyncState::Failed);
                return Err(SyncError::Failed {
                    entity: entity.to_string(),
                    source: error,
                });
            }
            Err(error) => {
                if error.is_conflict() {
                    metrics::increment_conflicts(entity.kind());
                }
                if attempts >= max_attempts {
                    ledger.record(entity, SyncState::Failed);
                    warn!(
                        entity = %entity,
                        attempts = attempts,
                        error = %error,
                        "Giving up on remote write"
                    );
                    return Err(SyncError::RetriesExhausted {
                        entity: entity.to_string(),
                        attempts,
                        last: error,
                    });
                }
                ledger.record(entity, SyncState::DesiredKnown);
                let delay = backoff.next_backoff();
                warn!(
                    entity = %entity,
                    attempt = attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Remote write failed, retrying against fresh state"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
