//! Outbound fetch to the origin.
//!
//! A single attempt per inbound request: no retries, since the player owns
//! retry and source-selection policy. Redirects are followed by the client;
//! the caller sees the final response. Dropping the returned future (client
//! disconnect) cancels the in-flight request.
//!
//! The upstream timeout bounds the wait for response headers only. Once a
//! body is flowing, the client's read timeout applies per read, so a long
//! segment keeps streaming as long as the origin keeps sending.

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::server::url_validation::validate_target_url;
use axum::http::HeaderMap;
use reqwest::{Client, Response, redirect};
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Build the shared HTTP client from configuration.
///
/// # Errors
/// Fails only if the TLS backend cannot be initialised.
pub fn build_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.upstream_timeout)
        .redirect(redirect_policy(config))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
}

/// Redirect policy for the shared client.
///
/// With private targets blocked, every hop is checked against the same
/// address rules as the inbound target.
fn redirect_policy(config: &Config) -> redirect::Policy {
    let max_redirects = config.max_redirects;
    if !config.block_private_targets {
        return redirect::Policy::limited(max_redirects);
    }

    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            return attempt.error(format!("too many redirects (max {max_redirects})"));
        }
        match validate_target_url(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(e) => {
                warn!("Refusing redirect to {}: {}", attempt.url(), e);
                attempt.error(e)
            }
        }
    })
}

/// GET `target` with the already-sanitized `headers`.
///
/// Non-success statuses are returned as `Ok`; only transport failures
/// (DNS, refused connection, TLS, too many redirects) and a missed
/// `header_timeout` are errors.
///
/// # Errors
/// [`RelayError::UpstreamTimeout`] when no response head arrives in time,
/// [`RelayError::ForbiddenTarget`] when a redirect leads to a blocked
/// address, [`RelayError::UpstreamUnreachable`] on any other transport
/// failure.
pub async fn fetch(
    client: &Client,
    target: &Url,
    headers: HeaderMap,
    header_timeout: Duration,
) -> Result<Response> {
    debug!("Fetching upstream: {}", target);

    let request = client.get(target.clone()).headers(headers).send();
    let response = match tokio::time::timeout(header_timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Upstream fetch failed for {}: {}", target, e);
            return Err(refused_redirect(&e)
                .unwrap_or(RelayError::UpstreamUnreachable { source: e }));
        }
        Err(_) => {
            warn!(
                "Upstream {} sent no response within {:?}",
                target, header_timeout
            );
            return Err(RelayError::UpstreamTimeout {
                after: header_timeout,
            });
        }
    };

    if response.url() != target {
        debug!("Upstream redirected {} -> {}", target, response.url());
    }
    if !response.status().is_success() {
        warn!("Upstream returned {} for {}", response.status(), target);
    }

    Ok(response)
}

/// Recover the address-guard rejection raised inside the redirect policy.
fn refused_redirect(err: &reqwest::Error) -> Option<RelayError> {
    if !err.is_redirect() {
        return None;
    }
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(RelayError::ForbiddenTarget(reason)) = inner.downcast_ref::<RelayError>() {
            return Some(RelayError::ForbiddenTarget(format!("redirect to {reason}")));
        }
        source = inner.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HEADER_TIMEOUT: Duration = Duration::from_millis(500);

    fn test_config() -> Config {
        Config {
            upstream_timeout: HEADER_TIMEOUT,
            block_private_targets: false,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn returns_success_response() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .and(header("x-test", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .mount(&server)
            .await;

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&format!("{}/live/index.m3u8", server.uri())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-test", "1".parse().unwrap());

        let response = fetch(&client, &target, headers, HEADER_TIMEOUT).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "#EXTM3U\n");
    }

    #[tokio::test]
    async fn error_status_is_not_a_fetch_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&server.uri()).unwrap();

        let response = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn follows_redirects() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old.m3u8"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/new.m3u8", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&format!("{}/old.m3u8", server.uri())).unwrap();

        let response = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT).await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.url().path().ends_with("/new.m3u8"));
    }

    #[tokio::test]
    async fn slow_response_head_is_gateway_timeout() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&server.uri()).unwrap();

        let err = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn refused_connection_is_bad_gateway() {
        // Bind and drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&format!("http://127.0.0.1:{port}/a.ts")).unwrap();

        let err = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn redirect_to_private_address_is_forbidden() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            block_private_targets: true,
            ..test_config()
        };
        let client = build_client(&config).unwrap();
        // Only redirect hops go through the policy; the first hop is checked
        // by target resolution.
        let target = Url::parse(&format!("{}/index.m3u8", server.uri())).unwrap();

        let err = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ForbiddenTarget(_)), "got {err:?}");
        assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn redirect_limit_still_applies_when_blocking() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://loop.example/again"),
            )
            .mount(&server)
            .await;

        let config = Config {
            block_private_targets: true,
            max_redirects: 0,
            ..test_config()
        };
        let client = build_client(&config).unwrap();
        let target = Url::parse(&server.uri()).unwrap();

        let err = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn header_timeout_does_not_cut_a_flowing_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let client = build_client(&test_config()).unwrap();
        let target = Url::parse(&server.uri()).unwrap();

        let response = fetch(&client, &target, HeaderMap::new(), HEADER_TIMEOUT)
            .await
            .unwrap();
        // Reading after the header deadline has passed must still succeed
        tokio::time::sleep(HEADER_TIMEOUT * 2).await;
        assert_eq!(response.bytes().await.unwrap().len(), 4096);
    }
}
