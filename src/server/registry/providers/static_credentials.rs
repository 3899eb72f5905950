use anyhow::Result;
use async_trait::async_trait;

use crate::server::registry::{models::RegistryCredentials, CredentialsProvider};

/// Provider that hands out the same configured username and password for every request
pub struct StaticCredentialsProvider {
    credentials: RegistryCredentials,
}

impl StaticCredentialsProvider {
    pub fn new(username: String, password: String) -> Self {
        Self {
            credentials: RegistryCredentials::new(username, password),
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn get_credentials(&self, _registry_host: &str) -> Result<RegistryCredentials> {
        Ok(self.credentials.clone())
    }

    fn provider_type(&self) -> &str {
        "static"
    }
}
