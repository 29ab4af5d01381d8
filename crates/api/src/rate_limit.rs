//! Rate Limiting Middleware using GCRA Algorithm
//!
//! Per-IP limits on `/predict` and `/predict_batch` using tower_governor.
//! Health, metrics and the banner are never limited.
//! Uses the Generic Cell Rate Algorithm (GCRA) for efficient,
//! accurate rate enforcement without background processes.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

/// Type alias for the governor config with default settings
/// StateInformationMiddleware is used when use_headers() is called to add X-RateLimit-* headers
pub type DefaultGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Apply the limiter at all
    pub enabled: bool,
    /// Seconds between quota replenishments
    pub per_second: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: 1,
            burst_size: 20,
        }
    }
}

/// Create a rate limiting governor config
///
/// Uses PeerIpKeyExtractor, so the service must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// Adds X-RateLimit-* headers to responses for quota visibility.
/// Returns None when the quota is degenerate (zero period or burst).
pub fn create_governor_config(config: &RateLimitConfig) -> Option<Arc<DefaultGovernorConfig>> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
}
