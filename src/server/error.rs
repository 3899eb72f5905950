use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Proxy error type that provides automatic logging and clean error responses.
///
/// This type:
/// - Automatically logs errors when converted to HTTP responses (via IntoResponse)
/// - Preserves full error chains from anyhow::Error for debugging
/// - Allows attaching structured context (method, path, request id)
/// - Returns a fixed, detail-free message to clients
///
/// # Example
///
/// ```rust,ignore
/// use crate::server::error::{ProxyError, ProxyErrorExt};
///
/// let response = upstream
///     .send(request)
///     .await
///     .bad_gateway_err("Upstream request failed")?;
/// ```
#[derive(Debug)]
pub struct ProxyError {
    /// HTTP status code to return
    pub status: StatusCode,
    /// User-facing error message (returned in response)
    pub message: String,
    /// Internal error with full chain (logged but not exposed to client)
    pub source: Option<anyhow::Error>,
    /// Structured context for logging (key-value pairs)
    pub context: Vec<(&'static str, String)>,
}

impl ProxyError {
    /// Create an error that has no underlying cause, e.g. a rejected client request
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    /// Create an error from an anyhow::Error with full error chain
    pub fn from_anyhow(
        source: anyhow::Error,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            source: Some(source),
            context: Vec::new(),
        }
    }

    /// Add a context field for logging (chainable)
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Create a 502 Bad Gateway error from an anyhow::Error
    pub fn bad_gateway(source: anyhow::Error, message: impl Into<String>) -> Self {
        Self::from_anyhow(source, StatusCode::BAD_GATEWAY, message)
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        // Log server errors (5xx) with full context using structured fields
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    error = %format!("{:#}", source),
                    "Proxy error"
                );
            } else {
                tracing::error!(
                    status = self.status.as_u16(),
                    message = %self.message,
                    context = ?self.context,
                    "Proxy error"
                );
            }
        }

        let body = Json(json!({
            "error": self.message,
        }));

        (self.status, body).into_response()
    }
}

/// Extension trait for Result types to easily convert to ProxyError
pub trait ProxyErrorExt<T> {
    /// Convert error to ProxyError with custom status and message
    fn proxy_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ProxyError>;

    /// Convert error to bad gateway (502)
    fn bad_gateway_err(self, message: impl Into<String>) -> Result<T, ProxyError>;
}

impl<T, E> ProxyErrorExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn proxy_err(self, status: StatusCode, message: impl Into<String>) -> Result<T, ProxyError> {
        self.map_err(|e| ProxyError::from_anyhow(e.into(), status, message))
    }

    fn bad_gateway_err(self, message: impl Into<String>) -> Result<T, ProxyError> {
        self.map_err(|e| ProxyError::bad_gateway(e.into(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_bad_gateway_response_hides_source() {
        let err = ProxyError::bad_gateway(
            anyhow::anyhow!("connection refused (os error 111)"),
            "Upstream request failed",
        )
        .with_context("method", "GET")
        .with_context("path", "/v2/");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Upstream request failed");
        assert!(!body.to_string().contains("connection refused"));
    }

    #[test]
    fn test_bad_gateway_err_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("boom"));
        let err = result.bad_gateway_err("Upstream request failed").unwrap_err();

        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.message, "Upstream request failed");
        assert!(err.source.is_some());
    }

    #[test]
    fn test_proxy_err_ext_custom_status() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("boom"));
        let err = result
            .proxy_err(StatusCode::INTERNAL_SERVER_ERROR, "Failed")
            .unwrap_err();

        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
