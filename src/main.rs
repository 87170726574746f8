//! # Arca Controller
//!
//! A Kubernetes controller that keeps labelled namespaces and annotated
//! services in sync with Tetrate Service Bridge.
//!
//! 1. **Discovery** - the `AgentConfig` named by `ACTIVE_CONFIG_NAME` selects
//!    namespaces with a single `key=value` label
//! 2. **Workspaces** - every selected namespace gets a workspace, its default
//!    settings and a gateway group
//! 3. **Exposure** - services annotated `arca.io/expose: "true"` are routed
//!    through the namespace gateway
//! 4. **Reverse sync** - workspace mirrors become local namespaces with a
//!    unified gateway install
//!
//! Metrics and probes are served on `METRICS_PORT` (default 5000).

use anyhow::Result;
use arca_controller::runtime::initialization::initialize;
use arca_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state).await
}
