//! # Custom Resource Definitions
//!
//! CRD types the controller reads and writes.
//!
//! ## Module Structure
//!
//! - `agent_config.rs` - `AgentConfig` discovery configuration and its status
//! - `xcp.rs` - workspace mirrors written by the management plane
//! - `install.rs` - local gateway installs

mod agent_config;
mod install;
mod xcp;

pub use agent_config::{AgentConfig, AgentConfigSpec, AgentConfigStatus, ConfigPhase, TetrateSpec};
pub use install::{GatewayInstall, GatewayInstallSpec, GatewayKubeSpec, GatewayServiceSpec};
pub use xcp::{WorkspaceMirrorSpec, XcpWorkspace};
