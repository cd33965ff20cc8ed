//! Error taxonomy for the relay pipeline.
//!
//! Every variant maps to exactly one HTTP status and a plain-text body.
//! CORS headers are attached afterwards by [`crate::server::cors`], so error
//! responses never need to carry them here.

use axum::{
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// No `url` query parameter on the inbound request
    #[error(
        "Missing required query parameter \"url\". Usage: ?url=<percent-encoded playlist or segment URL>"
    )]
    MissingTarget,

    /// The `url` parameter could not be decoded or is not an absolute URI
    #[error("Malformed target URL: {0}")]
    MalformedTarget(String),

    /// Unwrapping nested proxy URLs did not converge within the bound
    #[error("Target is wrapped through a proxy more than {depth} times; refusing to recurse")]
    RecursionLimitExceeded { depth: usize },

    /// The unwrapped target still points at this proxy
    #[error("Target points back at this proxy")]
    SelfReference,

    /// The inbound request carries no host to derive the proxy base from
    #[error("Cannot determine proxy address from request: {0}")]
    InvalidProxyHost(String),

    /// Target host is not allowed (SSRF guard)
    #[error("Target not allowed: {0}")]
    ForbiddenTarget(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    /// No response head from the origin within the upstream timeout
    #[error("Upstream sent no response within {after:?}")]
    UpstreamTimeout { after: Duration },

    /// Network-level failure talking to the origin (DNS, refused, stalled read)
    #[error("Upstream unreachable: {source}")]
    UpstreamUnreachable {
        #[source]
        source: reqwest::Error,
    },

    /// Origin answered with a non-success status for a playlist target
    #[error("Upstream returned {status}")]
    UpstreamError { status: StatusCode },
}

impl RelayError {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingTarget
            | RelayError::MalformedTarget(_)
            | RelayError::RecursionLimitExceeded { .. }
            | RelayError::SelfReference
            | RelayError::InvalidProxyHost(_) => StatusCode::BAD_REQUEST,
            RelayError::ForbiddenTarget(_) => StatusCode::FORBIDDEN,
            RelayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::UpstreamUnreachable { source } if source.is_timeout() => {
                StatusCode::GATEWAY_TIMEOUT
            }
            RelayError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamError { status } => *status,
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::MissingTarget => "missing_target",
            RelayError::MalformedTarget(_) => "malformed_target",
            RelayError::RecursionLimitExceeded { .. } => "recursion_limit",
            RelayError::SelfReference => "self_reference",
            RelayError::InvalidProxyHost(_) => "invalid_proxy_host",
            RelayError::ForbiddenTarget(_) => "forbidden_target",
            RelayError::MethodNotAllowed(_) => "method_not_allowed",
            RelayError::UpstreamTimeout { .. } => "upstream_timeout",
            RelayError::UpstreamUnreachable { source } if source.is_timeout() => "upstream_timeout",
            RelayError::UpstreamUnreachable { .. } => "upstream_unreachable",
            RelayError::UpstreamError { .. } => "upstream_status",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }

        let body = match &self {
            RelayError::UpstreamError { status } => format!(
                "Upstream returned {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
            other => other.to_string(),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
