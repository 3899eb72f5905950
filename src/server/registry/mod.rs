pub mod credentials;
pub mod models;
pub mod providers;

pub use credentials::{CredentialsProvider, SharedCredentialsProvider};
pub use models::RegistryCredentials;

use anyhow::Result;
use std::sync::Arc;

use crate::server::settings::{CredentialsSettings, RegistrySettings};

/// Build the credentials provider described by the registry settings
pub async fn init_credentials_provider(
    settings: &RegistrySettings,
) -> Result<SharedCredentialsProvider> {
    match &settings.credentials {
        #[cfg(feature = "aws")]
        CredentialsSettings::Ecr {
            region,
            access_key_id,
            secret_access_key,
            cache_ttl_secs,
            refresh_margin_secs,
        } => {
            use anyhow::Context;
            use providers::ecr::{EcrConfig, EcrCredentialsProvider};
            use std::time::Duration;

            let provider = EcrCredentialsProvider::new(
                &settings.host,
                EcrConfig {
                    region: region.clone(),
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                },
            )
            .await
            .context("Failed to initialize ECR credentials provider")?;

            tracing::info!(
                registry = %settings.host,
                region = %provider.region(),
                "Using ECR credentials provider"
            );

            Ok(Arc::new(providers::CachingCredentialsProvider::new(
                Arc::new(provider),
                Duration::from_secs(*cache_ttl_secs),
                Duration::from_secs(*refresh_margin_secs),
            )))
        }
        #[cfg(not(feature = "aws"))]
        CredentialsSettings::Ecr { .. } => {
            anyhow::bail!(
                "ECR credentials require the 'aws' feature. Please rebuild with --features aws"
            )
        }
        CredentialsSettings::Static { username, password } => {
            tracing::info!(registry = %settings.host, "Using static credentials provider");
            Ok(Arc::new(providers::StaticCredentialsProvider::new(
                username.clone(),
                password.clone(),
            )))
        }
    }
}
