//! # Controller
//!
//! Core controller modules.
//!
//! - `backoff`: Exponential backoff for remote retries
//! - `discovery`: Label selectors and the namespace admission index
//! - `merge`: Desired-over-current document merge
//! - `reconciler`: Event handlers and the periodic pass
//! - `server`: HTTP server for metrics and health checks
//! - `store`: The active configuration and its remote connection

pub mod backoff;
pub mod discovery;
pub mod merge;
pub mod reconciler;
pub mod server;
pub mod store;
