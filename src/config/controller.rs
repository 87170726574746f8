//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::*;
use std::str::FromStr;
use std::time::Duration;

/// What to do when a namespace stops matching the discovery selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelRemovalPolicy {
    /// Leave remote workspaces in place (default)
    #[default]
    Retain,
    /// Delete the namespace's gateway, gateway group, setting and workspace
    Delete,
}

impl FromStr for LabelRemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown label removal policy '{other}'")),
        }
    }
}

/// Exponential retry settings for the create-or-update protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per pass, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REMOTE_RETRY_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_BACKOFF_START_MS),
            max_backoff: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Fallback remote connection settings taken from the process environment
///
/// Used for any `spec.tetrate` field the `AgentConfig` leaves empty.
#[derive(Clone, Default)]
pub struct ConnectionDefaults {
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub organization: String,
    pub tenant: String,
    pub cluster_name: Option<String>,
}

impl std::fmt::Debug for ConnectionDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDefaults")
            .field("endpoint", &self.endpoint)
            .field("organization", &self.organization)
            .field("tenant", &self.tenant)
            .field("cluster_name", &self.cluster_name)
            .finish_non_exhaustive()
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Name of the `AgentConfig` that is honored; all others are ignored
    pub active_config_name: String,
    /// Maximum concurrent event handlers across all watch streams
    pub max_concurrent_reconciliations: usize,
    /// Retry ceiling and backoff for remote writes
    pub retry: RetryPolicy,
    /// Interval between periodic reconciliation passes
    pub periodic_interval: Duration,
    /// Delay before the first periodic pass after startup
    pub periodic_initial_delay: Duration,
    /// How long the configuration must be unchanged before a periodic pass runs
    pub periodic_idle: Duration,
    /// Remote request timeout
    pub request_timeout: Duration,
    /// Watch stream restart delay after unknown errors
    pub watch_restart_delay: Duration,
    /// Behavior when a namespace loses the discovery label
    pub label_removal_policy: LabelRemovalPolicy,
    /// Namespace holding workspace mirrors written by the management plane
    pub workspace_mirror_namespace: String,
    /// Connection defaults for fields missing from `spec.tetrate`
    pub connection_defaults: ConnectionDefaults,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            active_config_name: DEFAULT_ACTIVE_CONFIG_NAME.to_string(),
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            retry: RetryPolicy::default(),
            periodic_interval: Duration::from_secs(DEFAULT_PERIODIC_INTERVAL_SECS),
            periodic_initial_delay: Duration::from_secs(DEFAULT_PERIODIC_INITIAL_DELAY_SECS),
            periodic_idle: Duration::from_secs(DEFAULT_PERIODIC_IDLE_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            watch_restart_delay: Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS),
            label_removal_policy: LabelRemovalPolicy::Retain,
            workspace_mirror_namespace: DEFAULT_WORKSPACE_MIRROR_NAMESPACE.to_string(),
            connection_defaults: ConnectionDefaults {
                organization: DEFAULT_TETRATE_ORGANIZATION.to_string(),
                tenant: DEFAULT_TETRATE_TENANT.to_string(),
                ..ConnectionDefaults::default()
            },
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let policy = std::env::var("LABEL_REMOVAL_POLICY")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!("Ignoring LABEL_REMOVAL_POLICY: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        Self {
            active_config_name: env_var_or_default_str(
                "ACTIVE_CONFIG_NAME",
                DEFAULT_ACTIVE_CONFIG_NAME,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            )
            .max(1),
            retry: RetryPolicy {
                max_attempts: env_var_or_default(
                    "REMOTE_RETRY_MAX_ATTEMPTS",
                    DEFAULT_REMOTE_RETRY_MAX_ATTEMPTS,
                )
                .max(1),
                initial_backoff: Duration::from_millis(env_var_or_default(
                    "BACKOFF_START_MS",
                    DEFAULT_BACKOFF_START_MS,
                )),
                max_backoff: Duration::from_millis(env_var_or_default(
                    "BACKOFF_MAX_MS",
                    DEFAULT_BACKOFF_MAX_MS,
                )),
            },
            periodic_interval: Duration::from_secs(env_var_or_default(
                "PERIODIC_INTERVAL_SECS",
                DEFAULT_PERIODIC_INTERVAL_SECS,
            )),
            periodic_initial_delay: Duration::from_secs(env_var_or_default(
                "PERIODIC_INITIAL_DELAY_SECS",
                DEFAULT_PERIODIC_INITIAL_DELAY_SECS,
            )),
            periodic_idle: Duration::from_secs(env_var_or_default(
                "PERIODIC_IDLE_SECS",
                DEFAULT_PERIODIC_IDLE_SECS,
            )),
            request_timeout: Duration::from_secs(env_var_or_default(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            watch_restart_delay: Duration::from_secs(env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            )),
            label_removal_policy: policy,
            workspace_mirror_namespace: env_var_or_default_str(
                "WORKSPACE_MIRROR_NAMESPACE",
                DEFAULT_WORKSPACE_MIRROR_NAMESPACE,
            ),
            connection_defaults: ConnectionDefaults {
                endpoint: env_var_opt("TETRATE_ENDPOINT"),
                api_token: env_var_opt("TETRATE_API_TOKEN"),
                username: env_var_opt("TETRATE_USERNAME"),
                password: env_var_opt("TETRATE_PASSWORD"),
                organization: env_var_or_default_str(
                    "TETRATE_ORGANIZATION",
                    DEFAULT_TETRATE_ORGANIZATION,
                ),
                tenant: env_var_or_default_str("TETRATE_TENANT", DEFAULT_TETRATE_TENANT),
                cluster_name: env_var_opt("CLUSTER_NAME"),
            },
        }
    }
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a non-empty environment variable
fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
