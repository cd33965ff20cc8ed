use crate::{
    error::{RelayError, Result},
    hls::rewriter::PlaylistRewriter,
    metrics,
    proxy::{
        classify::{ContentClass, classify},
        response,
        target::{self, ResolveOptions, ResolvedTarget},
        upstream,
    },
    server::state::AppState,
};
use axum::{
    extract::State,
    http::{HeaderMap, Method, Uri, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::info;

/// Relay entry point, mounted on `/` and every unreserved path.
///
/// Resolves the `url` parameter, fetches it once, and either rewrites the
/// body as a playlist or streams it through. Dropping this future (client
/// disconnect) cancels the upstream request.
pub async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();

    match relay(&state, &method, &uri, &headers).await {
        Ok((class, response)) => {
            metrics::record_request(class.as_str(), response.status().as_u16());
            metrics::record_duration(class.as_str(), start);
            response
        }
        Err(e) => {
            if matches!(
                e,
                RelayError::UpstreamTimeout { .. }
                    | RelayError::UpstreamUnreachable { .. }
                    | RelayError::UpstreamError { .. }
            ) {
                metrics::record_upstream_error(e.reason());
            }
            metrics::record_request("error", e.status().as_u16());
            metrics::record_duration("error", start);
            e.into_response()
        }
    }
}

async fn relay(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<(ContentClass, Response)> {
    if !matches!(*method, Method::GET | Method::HEAD | Method::POST) {
        return Err(RelayError::MethodNotAllowed(method.clone()));
    }

    let ResolvedTarget { target, proxy_base } = target::resolve(
        uri,
        headers,
        &state.policy,
        ResolveOptions {
            block_private_targets: state.config.block_private_targets,
        },
    )?;

    let playlist_target = state.policy.is_playlist_path(&target);
    let outbound = state
        .header_policy
        .outbound(headers, &target, playlist_target);

    let upstream = upstream::fetch(
        &state.http_client,
        &target,
        outbound,
        state.config.upstream_timeout,
    )
    .await?;

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let class = classify(content_type.as_deref(), &target, &state.policy);

    match class {
        ContentClass::Playlist => {
            let status = upstream.status();
            // Never rewrite an error body
            if !status.is_success() {
                return Err(RelayError::UpstreamError { status });
            }

            // Raw bytes: decoding via `text()` would strip a leading BOM
            let bytes = upstream
                .bytes()
                .await
                .map_err(|e| RelayError::UpstreamUnreachable { source: e })?;
            let body = String::from_utf8_lossy(&bytes);

            let rewritten = PlaylistRewriter::new(&target, &proxy_base, &state.policy).rewrite(&body);
            metrics::record_references("proxy", rewritten.stats.proxied);
            metrics::record_references("passthrough", rewritten.stats.passthrough);
            metrics::record_references("unwrap", rewritten.stats.unwrapped);

            info!(
                "Rewrote playlist {} ({} references proxied, {} direct)",
                target, rewritten.stats.proxied, rewritten.stats.passthrough
            );

            Ok((class, response::playlist(status, rewritten.text)))
        }
        ContentClass::Opaque => {
            info!("Streaming {} ({})", target, upstream.status());
            let response =
                response::passthrough(upstream, &target, state.segment_cache_control.as_ref());
            Ok((class, response))
        }
    }
}
