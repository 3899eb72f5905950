use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::server::registry::{models::RegistryCredentials, CredentialsProvider};

/// Wraps another provider and reuses its credentials until they are about to expire
///
/// Concurrent callers that miss the cache for the same registry share a single
/// fetch from the inner provider. Failed fetches are not cached.
pub struct CachingCredentialsProvider {
    inner: Arc<dyn CredentialsProvider>,
    cache: Cache<String, RegistryCredentials>,
    refresh_margin: chrono::Duration,
}

impl CachingCredentialsProvider {
    /// Create a caching wrapper
    ///
    /// # Arguments
    /// * `ttl` - Upper bound on how long any credentials are kept
    /// * `refresh_margin` - Credentials expiring within this window are refetched
    pub fn new(inner: Arc<dyn CredentialsProvider>, ttl: Duration, refresh_margin: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(64)
            .build();

        Self {
            inner,
            cache,
            refresh_margin: chrono::Duration::from_std(refresh_margin)
                .unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}

#[async_trait]
impl CredentialsProvider for CachingCredentialsProvider {
    async fn get_credentials(&self, registry_host: &str) -> Result<RegistryCredentials> {
        if let Some(credentials) = self.cache.get(registry_host).await {
            if credentials.is_fresh_at(chrono::Utc::now(), self.refresh_margin) {
                return Ok(credentials);
            }
            tracing::debug!(
                registry = %registry_host,
                expires_at = ?credentials.expires_at,
                "Cached registry credentials are about to expire, refreshing"
            );
            self.cache.invalidate(registry_host).await;
        }

        self.cache
            .try_get_with(
                registry_host.to_string(),
                self.inner.get_credentials(registry_host),
            )
            .await
            .map_err(|e| anyhow::anyhow!("{:#}", e))
    }

    fn provider_type(&self) -> &str {
        self.inner.provider_type()
    }
}
