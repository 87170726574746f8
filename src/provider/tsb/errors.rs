//! HTTP status classification for management plane responses.

use crate::provider::{EntityRef, RemoteError};
use reqwest::StatusCode;

/// Marker the management plane puts in 5xx bodies for concurrent modification
const CONCURRENT_MODIFICATION_MARKER: &str = "already been modified";

/// Map a non-success response to a typed error
pub fn classify_failure(entity: &EntityRef, status: StatusCode, body: String) -> RemoteError {
    let code = status.as_u16();
    match code {
        409 | 412 => RemoteError::Conflict {
            entity: entity.to_string(),
            message: body,
        },
        401 | 403 => RemoteError::Auth {
            status: code,
            message: body,
        },
        500..=599 if body.contains(CONCURRENT_MODIFICATION_MARKER) => RemoteError::Conflict {
            entity: entity.to_string(),
            message: body,
        },
        408 | 429 | 500..=599 => RemoteError::Server {
            status: code,
            message: body,
        },
        _ => RemoteError::Rejected {
            status: code,
            message: body,
        },
    }
}

/// Map a reqwest transport failure
pub fn classify_transport(error: &reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::Decode(error.to_string())
    } else {
        RemoteError::Transport(error.to_string())
    }
}
