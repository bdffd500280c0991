/*
 * Utilities module aggregator: configuration parsing, error handling, and metrics
 * collection shared by every layer of the service.
 * I'm organizing cross-cutting concerns into a cohesive support layer for the
 * entire application.
 */

pub mod config;
pub mod error;
pub mod isbn;
pub mod metrics;

pub use config::Config;
pub use error::{AppError, Result};
pub use metrics::MetricsCollector;
