//! Detection and bounded unwrapping of proxy-wrapped URLs.
//!
//! A URL is *wrapped* when it carries a `url` query parameter whose value
//! (after one or more rounds of percent-decoding) is itself an absolute
//! http(s) URL. On the relay's own authority any query shape counts; on a
//! foreign authority the `url` parameter must be the only one, which keeps
//! ordinary CDN redirectors with extra parameters from being mistaken for
//! another relay instance.

use crate::error::{RelayError, Result};
use std::borrow::Cow;
use tracing::debug;
use url::Url;

/// Query parameter that carries the wrapped target.
pub const WRAPPER_PARAM: &str = "url";

/// True when both URLs address the same host and effective port.
pub fn same_authority(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(ha), Some(hb)) => {
            ha.eq_ignore_ascii_case(hb) && a.port_or_known_default() == b.port_or_known_default()
        }
        _ => false,
    }
}

/// Percent-decode `value` until it parses as an absolute http(s) URL.
///
/// Gives up after `max_rounds` extra decodes or once decoding stops changing
/// the value.
pub fn decode_nested(value: &str, max_rounds: usize) -> Option<Url> {
    let mut candidate: Cow<'_, str> = Cow::Borrowed(value.trim());

    for _ in 0..=max_rounds {
        if let Ok(url) = Url::parse(&candidate)
            && matches!(url.scheme(), "http" | "https")
            && url.has_host()
        {
            return Some(url);
        }
        if !candidate.contains('%') {
            return None;
        }
        let decoded = urlencoding::decode(&candidate).ok()?.into_owned();
        if decoded == candidate {
            return None;
        }
        candidate = Cow::Owned(decoded);
    }

    None
}

/// Per-request guard bound to the relay's own base address.
#[derive(Debug, Clone, Copy)]
pub struct RecursionGuard<'a> {
    proxy_base: &'a Url,
    max_depth: usize,
}

impl<'a> RecursionGuard<'a> {
    pub fn new(proxy_base: &'a Url, max_depth: usize) -> Self {
        Self {
            proxy_base,
            max_depth,
        }
    }

    /// Does `url` match the wrapper grammar?
    pub fn is_wrapped(&self, url: &Url) -> bool {
        self.unwrap_once(url).is_some()
    }

    /// Strip exactly one wrapper layer, returning the inner target.
    pub fn unwrap_once(&self, url: &Url) -> Option<Url> {
        let own = same_authority(url, self.proxy_base);

        let mut inner = None;
        let mut params = 0usize;
        for (key, value) in url.query_pairs() {
            params += 1;
            if key == WRAPPER_PARAM && inner.is_none() {
                inner = Some(value.into_owned());
            }
        }

        let inner = inner?;
        if !own && params != 1 {
            return None;
        }

        decode_nested(&inner, self.max_depth)
    }

    /// Strip wrapper layers until the URL no longer matches the grammar.
    ///
    /// # Errors
    /// [`RelayError::RecursionLimitExceeded`] when the URL is still wrapped
    /// after `max_depth` layers have been removed.
    pub fn unwrap(&self, url: Url) -> Result<Url> {
        let mut current = url;

        for layer in 0..self.max_depth {
            match self.unwrap_once(&current) {
                Some(inner) => {
                    debug!("Unwrapped proxy layer {}: {} -> {}", layer + 1, current, inner);
                    current = inner;
                }
                None => return Ok(current),
            }
        }

        if self.is_wrapped(&current) {
            return Err(RelayError::RecursionLimitExceeded {
                depth: self.max_depth,
            });
        }

        Ok(current)
    }
}
