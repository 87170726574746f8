//! Authorization header construction.

use crate::provider::RemoteCredentials;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("authentication credentials must be provided (apiToken or username/password)")]
    Missing,
}

/// Pick credentials: basic auth wins when both user and password are present
pub fn resolve_credentials(
    api_token: Option<&str>,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<RemoteCredentials, CredentialError> {
    match (non_empty(username), non_empty(password), non_empty(api_token)) {
        (Some(username), Some(password), _) => Ok(RemoteCredentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }),
        (_, _, Some(token)) => Ok(RemoteCredentials::Bearer(token.to_string())),
        _ => Err(CredentialError::Missing),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Value for the `Authorization` header
pub fn authorization_header(credentials: &RemoteCredentials) -> String {
    match credentials {
        RemoteCredentials::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            format!("Basic {encoded}")
        }
        RemoteCredentials::Bearer(token) => {
            if token.starts_with("Bearer ") {
                token.clone()
            } else {
                format!("Bearer {token}")
            }
        }
    }
}
