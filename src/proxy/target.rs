//! Target resolution: turn an inbound request into the upstream URL to fetch
//! and the relay's own externally visible base address.

use crate::error::{RelayError, Result};
use crate::proxy::policy::RewritePolicy;
use crate::proxy::recursion::{RecursionGuard, WRAPPER_PARAM, decode_nested, same_authority};
use crate::server::url_validation::validate_target_url;
use axum::http::{HeaderMap, Uri, header};
use tracing::debug;
use url::Url;

/// Upstream target plus the base address used for wrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Absolute, unwrapped, scheme-normalized upstream URL
    pub target: Url,
    /// Externally visible address of this relay for the current request
    pub proxy_base: Url,
}

/// Options that shape resolution beyond the rewrite policy.
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub block_private_targets: bool,
}

/// Resolve the inbound request's `url` parameter into a [`ResolvedTarget`].
///
/// # Errors
/// - [`RelayError::InvalidProxyHost`] when no host can be determined
/// - [`RelayError::MissingTarget`] when `url` is absent or empty
/// - [`RelayError::MalformedTarget`] when decoding or parsing fails
/// - [`RelayError::RecursionLimitExceeded`] when unwrapping does not converge
/// - [`RelayError::SelfReference`] when the target is the relay itself
/// - [`RelayError::ForbiddenTarget`] for private hosts (if enabled)
pub fn resolve(
    uri: &Uri,
    headers: &HeaderMap,
    policy: &RewritePolicy,
    options: ResolveOptions,
) -> Result<ResolvedTarget> {
    let proxy_base = proxy_base(uri, headers)?;
    let raw = target_param(uri.query()).ok_or(RelayError::MissingTarget)?;
    let parsed = parse_target(raw, policy.max_unwrap_depth())?;

    let guard = RecursionGuard::new(&proxy_base, policy.max_unwrap_depth());
    let unwrapped = guard.unwrap(parsed)?;
    let target = policy.normalize(unwrapped.clone());

    if same_authority(&unwrapped, &proxy_base) || same_authority(&target, &proxy_base) {
        return Err(RelayError::SelfReference);
    }

    if options.block_private_targets {
        validate_target_url(&target)?;
    }

    debug!("Resolved target {} via proxy base {}", target, proxy_base);

    Ok(ResolvedTarget { target, proxy_base })
}

/// Derive the relay's own base address from the inbound request.
///
/// Scheme comes from `X-Forwarded-Proto`, then the request URI, then `http`.
/// Host comes from `X-Forwarded-Host`, then `Host`, then the URI authority.
/// The request path is kept so a relay mounted under a prefix wraps
/// references back to that same prefix.
pub fn proxy_base(uri: &Uri, headers: &HeaderMap) -> Result<Url> {
    let scheme = first_header_token(headers, "x-forwarded-proto")
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string())
        .to_ascii_lowercase();

    let host = first_header_token(headers, "x-forwarded-host")
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RelayError::InvalidProxyHost("no Host header".to_string()))?;

    // Only an authority may land between the scheme and the path
    if host
        .chars()
        .any(|c| matches!(c, '/' | '?' | '#' | '@' | '\\') || c.is_whitespace())
    {
        return Err(RelayError::InvalidProxyHost(format!(
            "'{host}' is not a host"
        )));
    }

    let candidate = format!("{}://{}{}", scheme, host, uri.path());
    let base = Url::parse(&candidate)
        .map_err(|e| RelayError::InvalidProxyHost(format!("{candidate}: {e}")))?;

    if !matches!(base.scheme(), "http" | "https") {
        return Err(RelayError::InvalidProxyHost(format!(
            "unsupported scheme '{}'",
            base.scheme()
        )));
    }

    Ok(base)
}

/// Base for relative references: the target truncated to its directory.
pub fn directory_base(target: &Url) -> Url {
    let mut base = target.clone();
    base.set_query(None);
    base.set_fragment(None);

    let dir_len = base.path().rfind('/').map(|i| i + 1).unwrap_or(0);
    let dir = base.path()[..dir_len].to_string();
    base.set_path(if dir.is_empty() { "/" } else { &dir });
    base
}

/// Upgrade `http` to `https`; other schemes are returned untouched.
pub fn upgrade_scheme(mut url: Url) -> Url {
    if url.scheme() == "http" {
        // http -> https is always a permitted special-scheme transition
        let _ = url.set_scheme("https");
    }
    url
}

/// Raw (still percent-encoded) value of the `url` query parameter.
fn target_param(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == WRAPPER_PARAM).then_some(value)
        })
        .filter(|value| !value.is_empty())
}

fn parse_target(raw: &str, max_rounds: usize) -> Result<Url> {
    let decoded = urlencoding::decode(raw)
        .map_err(|e| RelayError::MalformedTarget(format!("invalid percent-encoding: {e}")))?;

    if let Some(url) = decode_nested(&decoded, max_rounds) {
        return Ok(url);
    }

    match Url::parse(decoded.trim()) {
        Ok(url) => Err(RelayError::MalformedTarget(format!(
            "scheme '{}' not supported, only http and https",
            url.scheme()
        ))),
        Err(e) => Err(RelayError::MalformedTarget(format!("'{decoded}': {e}"))),
    }
}

fn first_header_token(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::HeaderValue;

    fn policy() -> RewritePolicy {
        RewritePolicy::from_config(&Config::default())
    }

    fn headers(host: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::HOST, HeaderValue::from_str(host).unwrap());
        h
    }

    fn open() -> ResolveOptions {
        ResolveOptions {
            block_private_targets: false,
        }
    }

    fn resolve_str(uri: &str) -> Result<ResolvedTarget> {
        let uri: Uri = uri.parse().unwrap();
        resolve(&uri, &headers("proxy.test"), &policy(), open())
    }

    #[test]
    fn missing_url_param() {
        assert!(matches!(resolve_str("/"), Err(RelayError::MissingTarget)));
        assert!(matches!(resolve_str("/?foo=bar"), Err(RelayError::MissingTarget)));
        assert!(matches!(resolve_str("/?url="), Err(RelayError::MissingTarget)));
    }

    #[test]
    fn decodes_and_upgrades_scheme() {
        let r = resolve_str("/?url=http%3A%2F%2Fcdn.example%2Flive%2Findex.m3u8").unwrap();
        assert_eq!(r.target.as_str(), "https://cdn.example/live/index.m3u8");
        assert_eq!(r.proxy_base.as_str(), "http://proxy.test/");
    }

    #[test]
    fn accepts_unencoded_target() {
        let r = resolve_str("/?url=https://cdn.example/a.m3u8").unwrap();
        assert_eq!(r.target.as_str(), "https://cdn.example/a.m3u8");
    }

    #[test]
    fn relative_target_is_malformed() {
        assert!(matches!(
            resolve_str("/?url=live%2Findex.m3u8"),
            Err(RelayError::MalformedTarget(_))
        ));
    }

    #[test]
    fn non_http_target_is_malformed() {
        assert!(matches!(
            resolve_str("/?url=file%3A%2F%2F%2Fetc%2Fpasswd"),
            Err(RelayError::MalformedTarget(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            resolve_str("/?url=%FF%FE"),
            Err(RelayError::MalformedTarget(_))
        ));
    }

    #[test]
    fn wrapped_target_is_unwrapped() {
        let inner = urlencoding::encode("https://origin.test/a.m3u8").into_owned();
        let wrapped = format!("http://proxy.test/?url={inner}");
        let r = resolve_str(&format!("/?url={}", urlencoding::encode(&wrapped))).unwrap();
        assert_eq!(r.target.as_str(), "https://origin.test/a.m3u8");
    }

    #[test]
    fn self_reference_is_rejected() {
        assert!(matches!(
            resolve_str("/?url=http%3A%2F%2Fproxy.test%2Fhealth"),
            Err(RelayError::SelfReference)
        ));
    }

    #[test]
    fn runaway_chain_is_rejected() {
        let mut chain = "https://origin.test/a.m3u8".to_string();
        for _ in 0..10 {
            chain = format!("http://proxy.test/?url={}", urlencoding::encode(&chain));
        }
        let uri = format!("/?url={}", urlencoding::encode(&chain));
        assert!(matches!(
            resolve_str(&uri),
            Err(RelayError::RecursionLimitExceeded { .. })
        ));
    }

    #[test]
    fn private_targets_blocked_when_enabled() {
        let uri: Uri = "/?url=http%3A%2F%2F127.0.0.1%2Fa.m3u8".parse().unwrap();
        let result = resolve(
            &uri,
            &headers("proxy.test"),
            &policy(),
            ResolveOptions {
                block_private_targets: true,
            },
        );
        assert!(matches!(result, Err(RelayError::ForbiddenTarget(_))));
    }

    #[test]
    fn proxy_base_honours_forwarded_headers() {
        let mut h = headers("internal:8080");
        h.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        h.insert("x-forwarded-host", HeaderValue::from_static("relay.example"));
        let uri: Uri = "/hls/?url=x".parse().unwrap();
        assert_eq!(
            proxy_base(&uri, &h).unwrap().as_str(),
            "https://relay.example/hls/"
        );
    }

    #[test]
    fn proxy_base_requires_host() {
        let uri: Uri = "/?url=x".parse().unwrap();
        assert!(matches!(
            proxy_base(&uri, &HeaderMap::new()),
            Err(RelayError::InvalidProxyHost(_))
        ));
    }

    #[test]
    fn proxy_base_rejects_host_with_path_or_query() {
        let uri: Uri = "/?url=x".parse().unwrap();
        for bad in ["evil.example/x?y", "relay.test?a=b", "relay.test#frag", "user@relay.test"] {
            let mut h = headers("relay.test");
            h.insert("x-forwarded-host", HeaderValue::from_str(bad).unwrap());
            assert!(
                matches!(proxy_base(&uri, &h), Err(RelayError::InvalidProxyHost(_))),
                "accepted {bad}"
            );
        }

        assert!(matches!(
            proxy_base(&uri, &headers("relay.test/other")),
            Err(RelayError::InvalidProxyHost(_))
        ));
        assert_eq!(
            proxy_base(&uri, &headers("relay.test:8443")).unwrap().as_str(),
            "http://relay.test:8443/"
        );
    }

    #[test]
    fn directory_base_truncates_file_and_query() {
        let t = Url::parse("https://cdn.example/live/index.m3u8?token=1#frag").unwrap();
        assert_eq!(directory_base(&t).as_str(), "https://cdn.example/live/");
        let root = Url::parse("https://cdn.example").unwrap();
        assert_eq!(directory_base(&root).as_str(), "https://cdn.example/");
    }

    #[test]
    fn upgrade_leaves_https_and_other_schemes() {
        let https = Url::parse("https://a.example/x").unwrap();
        assert_eq!(upgrade_scheme(https.clone()), https);
        let skd = Url::parse("skd://key-id").unwrap();
        assert_eq!(upgrade_scheme(skd.clone()), skd);
        let http = Url::parse("http://a.example:8080/x").unwrap();
        assert_eq!(upgrade_scheme(http).as_str(), "https://a.example:8080/x");
    }
}
