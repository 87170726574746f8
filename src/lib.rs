//! Arca Controller Library
//!
//! Keeps Kubernetes namespaces and services selected by an `AgentConfig`
//! label in sync with Tetrate Service Bridge workspaces, settings, gateway
//! groups and gateways, and turns the workspace mirrors written back by the
//! management plane into local namespaces with a gateway install.
//!
//! - `cluster`: Kubernetes API seam
//! - `config`: environment configuration
//! - `controller`: discovery, merge, store, reconciler, HTTP server
//! - `crd`: `AgentConfig`, workspace mirror and gateway install resources
//! - `provider`: Tetrate API seam and its REST client
//! - `runtime`: process wiring

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod runtime;
