use axum::Router;

use super::handlers;
use crate::server::state::AppState;

/// Every method and path is forwarded; the proxy exposes no endpoints of its own
pub fn routes() -> Router<AppState> {
    Router::new().fallback(handlers::forward)
}
