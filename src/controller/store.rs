//! # Config Store
//!
//! Holds the single active discovery configuration together with its connected
//! remote client. All reconciliation is suspended while the store is empty or
//! marked unusable.

use crate::config::{ConnectionDefaults, ControllerConfig};
use crate::controller::discovery::{ConfigId, Selector, SelectorError};
use crate::crd::AgentConfig;
use crate::provider::tsb::{CredentialError, resolve_credentials};
use crate::provider::{RemoteClient, RemoteConnection, RemoteConnector, RemoteError};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Reasons an `AgentConfig` cannot be applied
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid discovery label: {0}")]
    Selector(#[from] SelectorError),
    #[error("no Tetrate endpoint configured (spec.tetrate.endpoint or TETRATE_ENDPOINT)")]
    MissingEndpoint,
    #[error("no cluster name configured (spec.tetrate.clusterName or CLUSTER_NAME)")]
    MissingClusterName,
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("failed to build remote client: {0}")]
    Connect(#[from] RemoteError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no active configuration")]
    NotInitialized,
    #[error("configuration '{0}' is unusable until it changes")]
    Unusable(ConfigId),
}

/// The applied configuration
pub struct ActiveConfig {
    pub id: ConfigId,
    pub generation: i64,
    pub selector: Selector,
    pub connection: RemoteConnection,
    /// Cluster name first, then the fabric name when one is configured
    pub dimensions: Vec<String>,
    pub remote: Arc<dyn RemoteClient>,
}

impl std::fmt::Debug for ActiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveConfig")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("selector", &self.selector)
            .field("connection", &self.connection)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

fn pick(spec_value: Option<&String>, fallback: Option<&String>) -> Option<String> {
    spec_value
        .filter(|v| !v.trim().is_empty())
        .or(fallback)
        .filter(|v| !v.trim().is_empty())
        .cloned()
}

impl ActiveConfig {
    /// Validate an `AgentConfig` and connect to its management plane
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for a malformed selector or incomplete connection settings
    pub fn resolve(
        config: &AgentConfig,
        settings: &ControllerConfig,
        connector: &dyn RemoteConnector,
    ) -> Result<Self, ConfigError> {
        let id = config.metadata.name.clone().unwrap_or_default();
        let generation = config.metadata.generation.unwrap_or(0);
        let selector: Selector = config.spec.discovery_label.parse()?;
        let tetrate = &config.spec.tetrate;
        let defaults: &ConnectionDefaults = &settings.connection_defaults;

        let endpoint = pick(tetrate.endpoint.as_ref(), defaults.endpoint.as_ref())
            .ok_or(ConfigError::MissingEndpoint)?;
        let api_token = pick(tetrate.api_token.as_ref(), defaults.api_token.as_ref());
        let username = pick(tetrate.username.as_ref(), defaults.username.as_ref());
        let password = pick(tetrate.password.as_ref(), defaults.password.as_ref());
        let credentials = resolve_credentials(
            api_token.as_deref(),
            username.as_deref(),
            password.as_deref(),
        )?;
        let cluster_name = pick(tetrate.cluster_name.as_ref(), defaults.cluster_name.as_ref())
            .ok_or(ConfigError::MissingClusterName)?;

        let mut dimensions = vec![cluster_name];
        if let Some(fabric) = pick(tetrate.fabric_name.as_ref(), None) {
            if !dimensions.contains(&fabric) {
                dimensions.push(fabric);
            }
        }

        let connection = RemoteConnection {
            endpoint,
            organization: pick(tetrate.organization.as_ref(), Some(&defaults.organization))
                .unwrap_or_else(|| defaults.organization.clone()),
            tenant: pick(tetrate.tenant.as_ref(), Some(&defaults.tenant))
                .unwrap_or_else(|| defaults.tenant.clone()),
            credentials,
            insecure_skip_verify: tetrate.insecure_skip_verify,
            request_timeout: settings.request_timeout,
        };
        let remote = connector.connect(&connection)?;

        Ok(Self {
            id,
            generation,
            selector,
            connection,
            dimensions,
            remote,
        })
    }

    /// The cluster-name dimension
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        self.dimensions.first().map_or("", String::as_str)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    active: Option<Arc<ActiveConfig>>,
    /// (name, generation) that failed validation
    rejected: Option<(ConfigId, i64)>,
    /// generation whose credentials were refused
    unusable: Option<i64>,
    changed_at: Option<Instant>,
}

/// Holder of the active configuration
#[derive(Debug, Default)]
pub struct ConfigStore {
    state: RwLock<StoreState>,
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        match self.state.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        match self.state.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Install a configuration, replacing any previous one
    pub fn apply(&self, config: ActiveConfig) -> Arc<ActiveConfig> {
        let config = Arc::new(config);
        self.write(|state| {
            state.active = Some(Arc::clone(&config));
            state.rejected = None;
            state.unusable = None;
            state.changed_at = Some(Instant::now());
        });
        config
    }

    /// Forget the active configuration
    pub fn clear(&self) {
        self.write(|state| {
            state.active = None;
            state.unusable = None;
            state.changed_at = Some(Instant::now());
        });
    }

    /// Record a generation that failed validation; it is not retried
    pub fn reject(&self, id: &str, generation: i64) {
        self.write(|state| {
            state.rejected = Some((id.to_string(), generation));
            state.changed_at = Some(Instant::now());
        });
    }

    #[must_use]
    pub fn is_rejected(&self, id: &str, generation: i64) -> bool {
        self.read(|state| {
            state
                .rejected
                .as_ref()
                .is_some_and(|(rejected_id, g)| rejected_id == id && *g == generation)
        })
    }

    /// Suspend reconciliation after an authentication failure
    pub fn mark_unusable(&self) {
        self.write(|state| {
            if let Some(active) = &state.active {
                state.unusable = Some(active.generation);
            }
        });
    }

    #[must_use]
    pub fn is_unusable(&self) -> bool {
        self.read(|state| state.unusable.is_some())
    }

    /// The active configuration, if one is installed and usable
    ///
    /// # Errors
    /// [`StoreError::NotInitialized`] before any configuration is applied and
    /// [`StoreError::Unusable`] after an authentication failure
    pub fn active(&self) -> Result<Arc<ActiveConfig>, StoreError> {
        self.read(|state| match &state.active {
            None => Err(StoreError::NotInitialized),
            Some(active) if state.unusable == Some(active.generation) => {
                Err(StoreError::Unusable(active.id.clone()))
            }
            Some(active) => Ok(Arc::clone(active)),
        })
    }

    /// The installed configuration regardless of usability
    #[must_use]
    pub fn installed(&self) -> Option<Arc<ActiveConfig>> {
        self.read(|state| state.active.clone())
    }

    /// Whether the configuration has been unchanged for at least `idle`
    #[must_use]
    pub fn is_stable(&self, idle: Duration) -> bool {
        self.read(|state| state.changed_at.is_none_or(|at| at.elapsed() >= idle))
    }
}
