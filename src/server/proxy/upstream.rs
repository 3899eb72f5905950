use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::{Body, HttpBody},
    http::request::Parts,
    response::Response,
};

/// Transport used to send rewritten requests to the registry
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// reqwest-backed upstream transport
///
/// Redirects are never followed: they are returned to the client (after
/// `Location` rewriting) so that blob downloads also flow through the proxy.
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let url = request.url().clone();
        self.client
            .execute(request)
            .await
            .with_context(|| format!("Failed to send request to {}", url))
    }
}

/// Convert a rewritten request into a reqwest request, streaming the body
pub fn into_upstream_request(parts: Parts, body: Body) -> Result<reqwest::Request> {
    let url = reqwest::Url::parse(&parts.uri.to_string())
        .with_context(|| format!("Invalid upstream URL: {}", parts.uri))?;

    let mut request = reqwest::Request::new(parts.method, url);
    *request.headers_mut() = parts.headers;

    // Bodiless requests (most registry GET/HEAD traffic) must not turn into
    // chunked uploads.
    if !body.is_end_stream() {
        *request.body_mut() = Some(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    Ok(request)
}

/// Convert an upstream response into a client response, streaming the body
pub fn into_client_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
