pub mod error;
pub mod middleware;
pub mod proxy;
pub mod registry;
pub mod settings;
pub mod state;

use anyhow::{Context, Result};
use axum::{middleware as axum_middleware, Router};
use settings::PublicScheme;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the proxy application: every request goes through the forwarding pipeline
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(proxy::routes::routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::request_id_middleware)),
        )
}

/// Run the proxy until the process is killed
///
/// Startup fails if no credentials can be obtained for the registry or if the
/// listener cannot be bound.
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    if settings.server.rewrite_redirects && settings.server.public_scheme == PublicScheme::Https {
        warn!(
            "server.public_scheme is https but the proxy listens on plain HTTP; \
             redirects will only work behind a TLS-terminating load balancer"
        );
    }

    let state = AppState::new_for_server(&settings).await?;
    state.verify_credentials().await?;

    let app = app(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    info!("Registry proxy listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
