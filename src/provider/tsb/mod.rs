//! # Tetrate Service Bridge REST Client
//!
//! reqwest implementation of [`RemoteClient`] for the TSB v2 API.
//!
//! All entity paths hang off
//! `{endpoint}/v2/organizations/{org}/tenants/{tenant}/`. Responses wrap the
//! entity under its kind key (`workspace`, `settings`, `group`, `gateway`)
//! next to a top-level `etag`; the client unwraps them into a flat
//! [`RemoteDocument`] whose body carries the etag.

mod auth;
mod errors;

pub use auth::{CredentialError, authorization_header, resolve_credentials};
pub use errors::classify_failure;

use crate::observability::metrics;
use crate::provider::{
    EntityRef, Lookup, RemoteClient, RemoteConnection, RemoteConnector, RemoteDocument,
    RemoteError,
};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span};

/// TSB REST client bound to one organization/tenant
pub struct TsbClient {
    http_client: Client,
    base_url: String,
    authorization: String,
}

impl std::fmt::Debug for TsbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TsbClient {
    /// Create a client for the connection's organization and tenant
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(connection: &RemoteConnection) -> Result<Self, RemoteError> {
        let http_client = Client::builder()
            .timeout(connection.request_timeout)
            .danger_accept_invalid_certs(connection.insecure_skip_verify)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;

        let base_url = format!(
            "{}/v2/organizations/{}/tenants/{}",
            connection.endpoint.trim_end_matches('/'),
            connection.organization,
            connection.tenant
        );

        if connection.insecure_skip_verify {
            info!("TLS certificate verification disabled for {}", base_url);
        }

        Ok(Self {
            http_client,
            base_url,
            authorization: authorization_header(&connection.credentials),
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn make_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        self.http_client
            .request(method, url)
            .header("Authorization", &self.authorization)
            .header("Accept", "application/json")
    }

    /// Send a request and return the status plus raw body
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(StatusCode, reqwest::header::HeaderMap, String), RemoteError> {
        let response = request.send().await.map_err(|e| errors::classify_transport(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| errors::classify_transport(&e))?;
        Ok((status, headers, body))
    }

    async fn timed<T>(
        &self,
        entity: &EntityRef,
        operation: &'static str,
        future: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        let start = Instant::now();
        let result = future.await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_conflict() => "conflict",
            Err(_) => "error",
        };
        metrics::record_remote_operation(
            entity.kind(),
            operation,
            outcome,
            start.elapsed().as_secs_f64(),
        );
        result
    }
}

/// Unwrap `{ "<key>": {...}, "etag": "..." }` into a flat document
fn unwrap_document(
    entity: &EntityRef,
    headers: &reqwest::header::HeaderMap,
    body: &str,
) -> Result<RemoteDocument, RemoteError> {
    let raw: Value = if body.trim().is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(body).map_err(|e| RemoteError::Decode(e.to_string()))?
    };

    let top_etag = raw.get("etag").and_then(Value::as_str).map(str::to_string);
    let mut document = match raw.get(entity.body_key()) {
        Some(inner @ Value::Object(_)) => inner.clone(),
        _ => raw,
    };

    let etag = top_etag
        .or_else(|| {
            document
                .get("etag")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| {
            headers
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

    if let (Some(tag), Value::Object(map)) = (&etag, &mut document) {
        map.insert("etag".to_string(), Value::String(tag.clone()));
    }

    Ok(RemoteDocument {
        etag,
        body: document,
    })
}

#[async_trait]
impl RemoteClient for TsbClient {
    async fn get(&self, entity: &EntityRef) -> Result<Lookup<RemoteDocument>, RemoteError> {
        let span = info_span!("tsb.get", entity = %entity);
        let request = self.make_request(Method::GET, &entity.item_path());
        self.timed(entity, "get", async {
            let (status, headers, body) = self.send(request).await?;
            if status == StatusCode::NOT_FOUND {
                debug!("{} not found", entity);
                return Ok(Lookup::Absent);
            }
            if !status.is_success() {
                return Err(classify_failure(entity, status, body));
            }
            Ok(Lookup::Found(unwrap_document(entity, &headers, &body)?))
        })
        .instrument(span)
        .await
    }

    async fn create(
        &self,
        entity: &EntityRef,
        document: &Value,
    ) -> Result<RemoteDocument, RemoteError> {
        let span = info_span!("tsb.create", entity = %entity);
        let mut payload = serde_json::Map::new();
        payload.insert("name".to_string(), json!(entity.name()));
        payload.insert(entity.body_key().to_string(), document.clone());
        let request = self
            .make_request(Method::POST, &entity.collection_path())
            .json(&payload);
        self.timed(entity, "create", async {
            info!("Creating {}", entity);
            let (status, headers, body) = self.send(request).await?;
            if !status.is_success() {
                return Err(classify_failure(entity, status, body));
            }
            unwrap_document(entity, &headers, &body)
        })
        .instrument(span)
        .await
    }

    async fn update(
        &self,
        entity: &EntityRef,
        document: &Value,
        etag: Option<&str>,
    ) -> Result<RemoteDocument, RemoteError> {
        let span = info_span!("tsb.update", entity = %entity);
        let mut request = self
            .make_request(Method::PUT, &entity.item_path())
            .json(document);
        if let Some(tag) = etag {
            request = request.header(reqwest::header::IF_MATCH, tag);
        }
        self.timed(entity, "update", async {
            info!("Updating {}", entity);
            let (status, headers, body) = self.send(request).await?;
            if !status.is_success() {
                return Err(classify_failure(entity, status, body));
            }
            unwrap_document(entity, &headers, &body)
        })
        .instrument(span)
        .await
    }

    async fn delete(&self, entity: &EntityRef) -> Result<(), RemoteError> {
        let span = info_span!("tsb.delete", entity = %entity);
        let request = self.make_request(Method::DELETE, &entity.item_path());
        self.timed(entity, "delete", async {
            info!("Deleting {}", entity);
            let (status, _, body) = self.send(request).await?;
            if status.is_success() || status == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Err(classify_failure(entity, status, body))
        })
        .instrument(span)
        .await
    }
}

/// Connector producing [`TsbClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct TsbConnector;

impl RemoteConnector for TsbConnector {
    fn connect(&self, connection: &RemoteConnection) -> Result<Arc<dyn RemoteClient>, RemoteError> {
        Ok(Arc::new(TsbClient::new(connection)?))
    }
}
