use async_trait::async_trait;
use std::sync::Arc;

use super::models::RegistryCredentials;

/// Provider for registry authentication credentials
///
/// Implementations are invoked once per proxied request and from many tasks at
/// once, so they must be cheap to call concurrently. Any caching or refreshing
/// of short-lived tokens happens behind this trait, never in the proxy itself.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Get credentials for a specific registry host
    ///
    /// # Arguments
    /// * `registry_host` - The registry hostname without protocol or path
    ///   (e.g., "123456789012.dkr.ecr.us-east-1.amazonaws.com")
    async fn get_credentials(&self, registry_host: &str) -> anyhow::Result<RegistryCredentials>;

    /// Short name of the provider for logging
    fn provider_type(&self) -> &str;
}

/// Shared credentials provider handle
pub type SharedCredentialsProvider = Arc<dyn CredentialsProvider>;
