//! # linerpc-server
//!
//! TCP server for linerpc.
//!
//! This crate provides:
//! - A function registry with blocking and non-blocking entries
//! - Request dispatch with blocking-call offload
//! - Per-connection line framing and the close-after-first-response policy
//! - Echo and static-file responders sharing the same listener loop
//! - YAML/environment configuration and Prometheus metrics

pub mod builtins;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod static_files;

pub use config::{Config, MetricsConfig, NetworkConfig, ServeMode, StaticFilesConfig};
pub use connection::{Connection, ConnectionState};
pub use dispatcher::{DispatchError, Dispatcher};
pub use error::ServerError;
pub use metrics::Metrics;
pub use registry::{Args, CallError, CallResult, Callable, Entry, FunctionRegistry};
pub use server::{Server, ServerConfig, ServerStats, Service};
pub use static_files::StaticFiles;
