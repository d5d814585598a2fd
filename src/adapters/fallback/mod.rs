//! `FallbackRepairer` adapters.

pub mod http;
pub mod noop;

pub use http::HttpFallbackRepairer;
pub use noop::NoopFallbackRepairer;

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::FallbackConfig;
use crate::domain::ports::FallbackRepairer;

/// The configured fallback: the HTTP service when an endpoint is set,
/// otherwise a repairer that declines everything.
pub fn from_config(config: &FallbackConfig) -> DomainResult<Arc<dyn FallbackRepairer>> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpFallbackRepairer::new(endpoint, config.timeout_secs)?)),
        None => Ok(Arc::new(NoopFallbackRepairer)),
    }
}
