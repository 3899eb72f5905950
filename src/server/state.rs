use crate::server::proxy::{
    upstream::{HttpUpstream, Upstream},
    ProxyConfig,
};
use crate::server::registry::{init_credentials_provider, CredentialsProvider};
use crate::server::settings::Settings;
use anyhow::{Context, Result};
use std::sync::Arc;

/// State shared by every proxied request; nothing in it is mutated after startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub credentials_provider: Arc<dyn CredentialsProvider>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    pub async fn new_for_server(settings: &Settings) -> Result<Self> {
        let config = ProxyConfig::from_settings(settings);
        let credentials_provider = init_credentials_provider(&settings.registry).await?;
        let upstream = HttpUpstream::new()?;

        Ok(Self {
            config: Arc::new(config),
            credentials_provider,
            upstream: Arc::new(upstream),
        })
    }

    /// Fetch credentials once so a provider that can never succeed stops the process
    /// before it starts accepting requests
    pub async fn verify_credentials(&self) -> Result<()> {
        tracing::info!(
            registry = %self.config.registry_host,
            provider = %self.credentials_provider.provider_type(),
            "Testing registry credentials..."
        );

        let credentials = self
            .credentials_provider
            .get_credentials(&self.config.registry_host)
            .await
            .with_context(|| {
                format!(
                    "Failed to get credentials for registry {}",
                    self.config.registry_host
                )
            })?;

        tracing::info!(
            username = %credentials.username,
            expires_at = ?credentials.expires_at,
            "✓ Registry credentials obtained"
        );
        Ok(())
    }
}
