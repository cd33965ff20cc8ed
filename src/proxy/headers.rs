//! Header policy for both directions of the relay.
//!
//! Outbound: inbound headers are copied except the ones that leak the
//! relay's identity, the player's caching state or hop-by-hop transport
//! details; then a fixed user agent and a `Referer` equal to the target's own
//! origin are set so origin-based hotlink checks pass.
//!
//! Inbound (pass-through responses): hop-by-hop headers and anything scoped
//! to the origin's own domain are dropped before the response is relayed.

use crate::config::{Config, DEFAULT_USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tracing::warn;
use url::Url;

/// Request headers never forwarded upstream.
const DROPPED_REQUEST_HEADERS: &[HeaderName] = &[
    header::HOST,
    header::CONNECTION,
    header::IF_MODIFIED_SINCE,
    header::IF_NONE_MATCH,
    header::IF_MATCH,
    header::IF_UNMODIFIED_SINCE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
    header::AUTHORIZATION,
    header::COOKIE,
    header::CONTENT_LENGTH,
    // reqwest is built without decompression; let it negotiate identity
    header::ACCEPT_ENCODING,
    header::FORWARDED,
    header::VIA,
    header::ORIGIN,
    header::REFERER,
    header::USER_AGENT,
];

/// Request header name prefixes never forwarded upstream.
const DROPPED_REQUEST_PREFIXES: &[&str] = &["x-forwarded-", "x-real-ip", "sec-", "cf-", "proxy-"];

/// Dropped for playlist targets only: a partial manifest is useless.
const PLAYLIST_ONLY_DROPS: &[HeaderName] = &[header::RANGE, header::IF_RANGE];

/// Response headers never relayed back to the player.
const DROPPED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TRAILER,
    header::TE,
    header::PROXY_AUTHENTICATE,
    header::SET_COOKIE,
    header::STRICT_TRANSPORT_SECURITY,
    header::ALT_SVC,
];

/// Response header name prefixes never relayed back.
const DROPPED_RESPONSE_PREFIXES: &[&str] = &["access-control-", "keep-alive", "proxy-"];

/// Deterministic outbound header policy, built once from configuration.
#[derive(Clone, Debug)]
pub struct HeaderPolicy {
    user_agent: HeaderValue,
    send_origin: bool,
}

impl HeaderPolicy {
    pub fn from_config(config: &Config) -> Self {
        let user_agent = HeaderValue::from_str(&config.user_agent).unwrap_or_else(|_| {
            warn!(
                "USER_AGENT '{}' is not a valid header value, using default",
                config.user_agent
            );
            HeaderValue::from_static(DEFAULT_USER_AGENT)
        });

        Self {
            user_agent,
            send_origin: config.send_origin_header,
        }
    }

    /// Headers for the upstream request to `target`.
    pub fn outbound(&self, inbound: &HeaderMap, target: &Url, playlist_target: bool) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 3);

        for (name, value) in inbound {
            if is_dropped_request_header(name)
                || (playlist_target && PLAYLIST_ONLY_DROPS.contains(name))
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers.insert(header::USER_AGENT, self.user_agent.clone());

        let origin = target.origin().ascii_serialization();
        // Opaque origins serialize as "null" and are not worth sending
        if origin != "null" {
            if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
                headers.insert(header::REFERER, referer);
            }
            if self.send_origin
                && let Ok(value) = HeaderValue::from_str(&origin)
            {
                headers.insert(header::ORIGIN, value);
            }
        }

        headers
    }
}

fn is_dropped_request_header(name: &HeaderName) -> bool {
    DROPPED_REQUEST_HEADERS.contains(name)
        || DROPPED_REQUEST_PREFIXES
            .iter()
            .any(|prefix| name.as_str().starts_with(prefix))
}

/// Filter an upstream response's headers for pass-through.
pub fn passthrough_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        let dropped = DROPPED_RESPONSE_HEADERS.contains(name)
            || DROPPED_RESPONSE_PREFIXES
                .iter()
                .any(|prefix| name.as_str().starts_with(prefix));
        if !dropped {
            headers.append(name.clone(), value.clone());
        }
    }

    headers
}
