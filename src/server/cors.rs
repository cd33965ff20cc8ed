//! Preflight responder and CORS finalizer.
//!
//! Runs outermost so that every response leaving the relay carries the
//! permissive header set: successes, upstream errors, 404s and 405s alike.
//! Preflights are answered here and never reach the router.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, HEAD, POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "*";
/// How long browsers may cache a preflight result.
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// Header carrying the crate version on every response.
pub const VERSION_HEADER: &str = "x-hls-relay-version";

/// Overwrite the CORS headers on `headers`.
///
/// Upstream `Access-Control-*` values are replaced, not merged.
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

/// Empty 204 with the CORS set; no target resolution, no network.
pub fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    apply_cors_headers(response.headers_mut());
    response.headers_mut().insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

/// Axum middleware: answer preflights, then stamp CORS on everything else.
pub async fn cors_middleware(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        debug!("Preflight for {}", req.uri().path());
        return preflight();
    }

    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    response
}

/// Axum middleware: add the version header to every response.
pub async fn version_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response.headers_mut().insert(
        VERSION_HEADER,
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}
