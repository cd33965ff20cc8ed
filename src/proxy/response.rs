//! Response assembly for the two success paths.
//!
//! Playlists get a forced MIME type and no-cache headers; everything else is
//! streamed back with the origin's status and filtered headers. CORS headers
//! are not set here: the CORS layer adds them to every response on the way out.

use crate::proxy::classify::default_content_type;
use crate::proxy::headers::passthrough_response_headers;
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use tracing::warn;
use url::Url;

/// Canonical playlist content type, regardless of what the origin declared.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl; charset=utf-8";

/// Playlists change constantly; a stale manifest stalls the player.
pub const PLAYLIST_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

/// Build the response for a rewritten playlist.
pub fn playlist(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, PLAYLIST_CACHE_CONTROL),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}

/// Stream an opaque upstream response through unchanged.
///
/// The origin's cache headers are kept unless `cache_override` is set.
pub fn passthrough(
    upstream: reqwest::Response,
    target: &Url,
    cache_override: Option<&HeaderValue>,
) -> Response {
    let status = upstream.status();
    let mut headers = passthrough_response_headers(upstream.headers());

    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(default_content_type(target)),
        );
    }
    if let Some(value) = cache_override {
        headers.insert(header::CACHE_CONTROL, value.clone());
    }

    let source = target.clone();
    let stream = upstream.bytes_stream().inspect_err(move |e| {
        warn!("Upstream body stream from {} failed: {}", source, e);
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
