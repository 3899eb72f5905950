pub mod handlers;
pub mod headers;
pub mod request;
pub mod response;
pub mod routes;
pub mod upstream;

use crate::server::settings::{PublicScheme, Settings};

/// Immutable proxy configuration, built once at startup and shared by every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Upstream registry authority (e.g., "123456789012.dkr.ecr.us-east-1.amazonaws.com")
    pub registry_host: String,
    /// Hostname clients use to reach the proxy
    pub public_hostname: String,
    /// Scheme clients use to reach the proxy
    pub public_scheme: PublicScheme,
    /// Port the proxy listens on
    pub port: u16,
    /// Whether upstream `Location` headers are rewritten
    pub rewrite_redirects: bool,
}

impl ProxyConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            registry_host: settings.registry.host.clone(),
            public_hostname: settings.server.public_hostname.trim().to_string(),
            public_scheme: settings.server.public_scheme,
            port: settings.server.port,
            rewrite_redirects: settings.server.rewrite_redirects,
        }
    }

    /// Base URL of the proxy as seen by clients, e.g. "http://registry-proxy.internal:8080/"
    pub fn public_base_url(&self) -> String {
        format!(
            "{}://{}:{}/",
            self.public_scheme.as_str(),
            self.public_hostname,
            self.port
        )
    }
}
