use crate::{
    config::Config,
    proxy::{headers::HeaderPolicy, policy::RewritePolicy, upstream},
};
use axum::http::HeaderValue;
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Application state shared across all handlers.
///
/// Everything here is immutable after startup. The client's connection pool
/// is the only shared resource and holds nothing derived from a request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling
    pub http_client: Client,
    pub policy: Arc<RewritePolicy>,
    pub header_policy: Arc<HeaderPolicy>,
    /// Prometheus render handle for `/metrics`
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
    /// Parsed `SEGMENT_CACHE_CONTROL`, if set and valid
    pub segment_cache_control: Option<HeaderValue>,
}

impl AppState {
    /// Create the state for `config`.
    ///
    /// # Errors
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: Config) -> reqwest::Result<Self> {
        let http_client = upstream::build_client(&config)?;
        let policy = RewritePolicy::from_config(&config);
        let header_policy = HeaderPolicy::from_config(&config);

        let segment_cache_control = config.segment_cache_control.as_deref().and_then(|value| {
            HeaderValue::from_str(value)
                .inspect_err(|_| warn!("Ignoring invalid SEGMENT_CACHE_CONTROL '{}'", value))
                .ok()
        });

        Ok(Self {
            config: Arc::new(config),
            http_client,
            policy: Arc::new(policy),
            header_policy: Arc::new(header_policy),
            metrics: crate::metrics::init(),
            started_at: Instant::now(),
            segment_cache_control,
        })
    }
}
