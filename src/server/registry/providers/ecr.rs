use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::Client as EcrClient;
use base64::Engine;

use crate::server::registry::{models::RegistryCredentials, CredentialsProvider};

lazy_static::lazy_static! {
    static ref ECR_HOST_PATTERN: regex::Regex = regex::Regex::new(
        r"^(?P<account>[0-9]{12})\.dkr\.ecr(?:-fips)?\.(?P<region>[a-z0-9-]+)\.(?:amazonaws\.com(?:\.cn)?|sc2s\.sgov\.gov|c2s\.ic\.gov)$"
    )
    .unwrap();
}

/// Configuration for the ECR credentials provider
#[derive(Debug, Clone, Default)]
pub struct EcrConfig {
    /// AWS region (e.g., "us-east-1"); derived from the registry host when not set
    pub region: Option<String>,
    /// Optional: AWS access key ID (if not using IAM role)
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using IAM role)
    pub secret_access_key: Option<String>,
}

/// Account and region parsed from an ECR registry host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrRegistry {
    pub account_id: String,
    pub region: String,
}

impl EcrRegistry {
    /// Parse a host like "123456789012.dkr.ecr.us-east-1.amazonaws.com"
    pub fn parse(registry_host: &str) -> Option<Self> {
        let host = registry_host.split(':').next().unwrap_or(registry_host);
        let caps = ECR_HOST_PATTERN.captures(host)?;

        Some(Self {
            account_id: caps["account"].to_string(),
            region: caps["region"].to_string(),
        })
    }
}

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.chars().count() > 200 {
        format!("{}...", debug_str.chars().take(200).collect::<String>())
    } else {
        debug_str
    }
}

/// Decode an ECR authorization token (base64 of "AWS:password") into its two parts
fn decode_authorization_token(token: &str) -> Result<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token)
        .context("Failed to decode ECR token")?;

    let decoded_str = String::from_utf8(decoded).context("ECR token is not valid UTF-8")?;

    match decoded_str.split_once(':') {
        Some((username, password)) => Ok((username.to_string(), password.to_string())),
        None => anyhow::bail!("Invalid ECR token format"),
    }
}

/// AWS ECR credentials provider
///
/// Every call performs a `GetAuthorizationToken` request; wrap it in a
/// [`super::CachingCredentialsProvider`] to reuse tokens until they expire.
pub struct EcrCredentialsProvider {
    client: EcrClient,
    registry: EcrRegistry,
}

impl EcrCredentialsProvider {
    /// Create a new ECR provider for the given registry host
    pub async fn new(registry_host: &str, config: EcrConfig) -> Result<Self> {
        let mut registry = EcrRegistry::parse(registry_host).with_context(|| {
            format!(
                "'{}' is not an ECR registry host (expected <account>.dkr.ecr.<region>.amazonaws.com)",
                registry_host
            )
        })?;
        if let Some(region) = config.region {
            registry.region = region;
        }

        let aws_config = if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            // Use static credentials if provided
            let creds =
                aws_sdk_ecr::config::Credentials::new(access_key, secret_key, None, None, "static");
            aws_config::defaults(BehaviorVersion::latest())
                .credentials_provider(creds)
                .region(aws_config::Region::new(registry.region.clone()))
                .load()
                .await
        } else {
            // Use default credential chain (IAM role, env vars, etc.)
            aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(registry.region.clone()))
                .load()
                .await
        };

        Ok(Self {
            client: EcrClient::new(&aws_config),
            registry,
        })
    }

    pub fn region(&self) -> &str {
        &self.registry.region
    }
}

#[async_trait]
impl CredentialsProvider for EcrCredentialsProvider {
    async fn get_credentials(&self, registry_host: &str) -> Result<RegistryCredentials> {
        tracing::debug!(
            registry = %registry_host,
            account_id = %self.registry.account_id,
            "Requesting ECR authorization token"
        );

        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to get ECR authorization token: {}",
                    format_sdk_error(&e)
                )
            })?;

        let auth_data = response
            .authorization_data()
            .first()
            .context("No authorization data returned from ECR")?;

        let token = auth_data
            .authorization_token()
            .context("No authorization token in response")?;

        let (username, password) = decode_authorization_token(token)?;
        let mut credentials = RegistryCredentials::new(username, password);

        if let Some(expires_at) = auth_data
            .expires_at()
            .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
        {
            credentials = credentials.with_expiry(expires_at);
        }

        Ok(credentials)
    }

    fn provider_type(&self) -> &str {
        "ecr"
    }
}
