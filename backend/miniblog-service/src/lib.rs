/// Miniblog Service Library
///
/// Posts, subscriptions and fan-out-on-write feeds.
///
/// # Modules
///
/// - `handlers`: HTTP request handlers
/// - `models`: post, feed item and id types
/// - `services`: business logic layer and write-path ordering
/// - `db`: storage traits with Postgres and in-memory implementations
/// - `cache`: version-gated read-through post cache
/// - `pagination`: keyset pagination shared by listings and feeds
/// - `workers`: fan-out worker and consumer pool
/// - `middleware`: caller identity extraction
/// - `error`: error types and HTTP mapping
/// - `config`: configuration management
/// - `metrics`: Prometheus collectors
/// - `app`: backend selection and wiring
pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{AppError, ErrorKind, Result};
