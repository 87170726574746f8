//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Name of the only `AgentConfig` the controller honors
pub const DEFAULT_ACTIVE_CONFIG_NAME: &str = "default";

/// Default size of the event worker pool
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default ceiling for create-or-update attempts against the remote API
pub const DEFAULT_REMOTE_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 500;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default periodic reconciliation interval (seconds)
pub const DEFAULT_PERIODIC_INTERVAL_SECS: u64 = 300;

/// Default delay before the first periodic reconciliation (seconds)
pub const DEFAULT_PERIODIC_INITIAL_DELAY_SECS: u64 = 60;

/// Minimum time the configuration must be unchanged before a periodic pass runs (seconds)
pub const DEFAULT_PERIODIC_IDLE_SECS: u64 = 60;

/// Default remote request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Namespace the management plane writes workspace mirrors into
pub const DEFAULT_WORKSPACE_MIRROR_NAMESPACE: &str = "tsb";

/// Default Tetrate organization when neither `spec.tetrate` nor the environment sets one
pub const DEFAULT_TETRATE_ORGANIZATION: &str = "tetrate";

/// Default Tetrate tenant when neither `spec.tetrate` nor the environment sets one
pub const DEFAULT_TETRATE_TENANT: &str = "arca";

/// Finalizer placed on the active `AgentConfig`
pub const CONFIG_FINALIZER: &str = "operator.arca.io/agent-cleanup";

/// Field manager used for server-side patches
pub const FIELD_MANAGER: &str = "arca-controller";

/// Ownership label on every object the controller manages
pub const LABEL_MANAGED: &str = "arca.io/managed";

/// Label carrying the namespace a remote workspace belongs to
pub const LABEL_NAMESPACE: &str = "arca.io/namespace";

/// Label carrying the workspace a reverse-synced namespace belongs to
pub const LABEL_WORKSPACE: &str = "arca.io/workspace";

/// Namespace annotation copied from the mirror's FQN annotation
pub const ANNOTATION_WORKSPACE_FQN: &str = "arca.io/workspace-fqn";

/// Namespace annotation copied from the mirror's config-mode annotation
pub const ANNOTATION_CONFIG_MODE: &str = "arca.io/config-mode";

/// Mirror annotation holding the workspace FQN
pub const TSB_ANNOTATION_FQN: &str = "tsb.tetrate.io/fqn";

/// Mirror annotation holding the workspace config mode
pub const TSB_ANNOTATION_CONFIG_MODE: &str = "tsb.tetrate.io/config-mode";

/// Service annotation enabling exposure (`"true"`)
pub const ANNOTATION_EXPOSE: &str = "arca.io/expose";

/// Service annotation with the public hostname
pub const ANNOTATION_DOMAIN: &str = "arca.io/domain";

/// Service annotation with the path prefix (defaults to `/`)
pub const ANNOTATION_PATH: &str = "arca.io/path";

/// Service annotation selecting the target port (defaults to the first port)
pub const ANNOTATION_PORT: &str = "arca.io/port";

/// Exposure status written back to the service
pub const ANNOTATION_EXPOSURE_STATUS: &str = "arca.io/exposure-status";

/// Exposure URL written back to the service
pub const ANNOTATION_EXPOSURE_URL: &str = "arca.io/exposure-url";

/// Exposure error detail written back to the service
pub const ANNOTATION_EXPOSURE_ERROR: &str = "arca.io/exposure-error";

/// Name of the workspace setting created for every workspace
pub const WORKSPACE_SETTING_NAME: &str = "default";

/// How long shutdown waits for in-flight reconciliations (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
