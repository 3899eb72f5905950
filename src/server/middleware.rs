use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

/// Request ID stored in request extensions for correlation and debugging
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Middleware that generates a unique request ID for each request.
///
/// The request ID is:
/// - Generated as a UUID v4
/// - Stored in request extensions for use by handlers
/// - Recorded on a span wrapping the rest of the request, so every log line
///   emitted while proxying carries it
///
/// It is not added to the response; clients see exactly the
/// headers the registry sent.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!("proxy_request", request_id = %request_id.0);
    next.run(request).instrument(span).await
}
