use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::Response,
};
use tracing::{debug, info};

use super::{request, response, upstream};
use crate::server::error::{ProxyError, ProxyErrorExt};
use crate::server::middleware::RequestId;
use crate::server::state::AppState;

/// Forward any request to the registry
///
/// Credentials are fetched for every request; the provider decides whether
/// they come from a cache. Failures talking to the registry become 502s.
pub async fn forward(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ProxyError> {
    let (mut parts, body) = request.into_parts();

    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let request_id = parts
        .extensions
        .get::<RequestId>()
        .map(|id| id.0.to_string())
        .unwrap_or_default();
    let with_request_context = |err: ProxyError| {
        err.with_context("method", method.as_str())
            .with_context("path", path.as_str())
            .with_context("request_id", request_id.as_str())
    };

    info!(method = %method, path = %path, "Registry request");

    if request::has_dot_segments(&path) {
        return Err(with_request_context(ProxyError::new(
            StatusCode::BAD_REQUEST,
            "Request path must not contain dot segments",
        )));
    }

    let credentials = request::fetch_credentials(
        state.credentials_provider.as_ref(),
        &state.config.registry_host,
    )
    .await;

    request::rewrite_request(&mut parts, &state.config, credentials.as_ref())
        .proxy_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build upstream request",
        )
        .map_err(&with_request_context)?;

    let outbound = upstream::into_upstream_request(parts, body)
        .proxy_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build upstream request",
        )
        .map_err(&with_request_context)?;

    let upstream_response = state
        .upstream
        .send(outbound)
        .await
        .bad_gateway_err("Upstream request failed")
        .map_err(&with_request_context)?;

    debug!(
        status = %upstream_response.status(),
        headers = ?upstream_response.headers(),
        "Registry response"
    );

    let mut client_response = upstream::into_client_response(upstream_response);
    response::rewrite_response_headers(client_response.headers_mut(), &state.config)
        .bad_gateway_err("Failed to rewrite registry redirect")
        .map_err(&with_request_context)?;

    Ok(client_response)
}
