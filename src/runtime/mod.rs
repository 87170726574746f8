//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization`: tracing, metrics, server and client setup
//! - `watch_loop`: watch streams, worker pool, shutdown
//! - `error_policy`: watch and handler error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
