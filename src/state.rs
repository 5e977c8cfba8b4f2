use std::sync::Arc;

use crate::config::AppConfig;
use crate::matching::semantic::{provider_from_config, EmbeddingProvider};
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;

/// Per-endpoint limits: (key, max requests, window seconds).
pub const ENDPOINT_LIMITS: &[(&str, usize, u64)] = &[
    ("/inquiries", 30, 60),
    ("/tours/request", 20, 60),
    ("/matching/homes", 60, 60),
];

/// The shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Tighter limits for lead creation, tour requests and match scoring.
    pub rate_limiter: EndpointRateLimiter,
    /// Produces preference and home embeddings for semantic matching.
    pub embeddings: Arc<dyn EmbeddingProvider>,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> Self {
        let embeddings = provider_from_config(&config.matching);
        Self::with_embeddings(db, config, embeddings)
    }

    pub fn with_embeddings(db: sqlx::SqlitePool, config: AppConfig, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(ENDPOINT_LIMITS.to_vec());
        Self { db, config: Arc::new(config), metrics: Metrics::new(), rate_limiter, embeddings }
    }
}
