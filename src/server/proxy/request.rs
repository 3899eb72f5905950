use anyhow::{Context, Result};
use axum::http::{
    header::{self, HeaderValue},
    request::Parts,
    uri::{Scheme, Uri},
};

use super::{headers, ProxyConfig};
use crate::server::registry::{CredentialsProvider, RegistryCredentials};

/// Fetch credentials for the configured registry
///
/// A provider failure is logged and yields `None` so the request can still be
/// forwarded; the registry will then answer with its own authentication error.
pub async fn fetch_credentials(
    provider: &dyn CredentialsProvider,
    registry_host: &str,
) -> Option<RegistryCredentials> {
    match provider.get_credentials(registry_host).await {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            tracing::error!(
                registry = %registry_host,
                provider = %provider.provider_type(),
                error = %format!("{:#}", e),
                "Failed to get registry credentials, forwarding request without authorization"
            );
            None
        }
    }
}

/// Whether a request path contains `.` or `..` segments, plain or percent-encoded
///
/// The upstream URL parser resolves these segments, so such a path could not be
/// forwarded verbatim. Registry API paths never contain them.
pub fn has_dot_segments(path: &str) -> bool {
    path.split('/').any(|segment| {
        let segment = segment.to_ascii_lowercase().replace("%2e", ".");
        segment == "." || segment == ".."
    })
}

/// Build the upstream URI: always HTTPS to the registry, keeping path and query
pub fn upstream_uri(config: &ProxyConfig, uri: &Uri) -> Result<Uri> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(Scheme::HTTPS)
        .authority(config.registry_host.as_str())
        .path_and_query(path_and_query)
        .build()
        .with_context(|| format!("Invalid upstream URI for registry {}", config.registry_host))
}

/// Rewrite an inbound request in place so it can be sent to the registry
///
/// - any client-supplied `Authorization` is dropped; `credentials`, when present,
///   become `Authorization: Basic base64(username:password)`
/// - scheme, authority and `Host` are set to the registry over HTTPS
/// - hop-by-hop and `X-Forwarded-*` headers are removed
pub fn rewrite_request(
    parts: &mut Parts,
    config: &ProxyConfig,
    credentials: Option<&RegistryCredentials>,
) -> Result<()> {
    headers::remove_hop_by_hop_headers(&mut parts.headers);
    headers::remove_forwarding_headers(&mut parts.headers);

    parts.headers.remove(header::AUTHORIZATION);
    if let Some(credentials) = credentials {
        let value = credentials
            .basic_auth_header()
            .context("Registry credentials cannot be encoded as a header")?;
        parts.headers.insert(header::AUTHORIZATION, value);
    }

    parts.uri = upstream_uri(config, &parts.uri)?;
    parts.headers.insert(
        header::HOST,
        HeaderValue::from_str(&config.registry_host).context("Invalid registry host header")?,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use async_trait::async_trait;
    use axum::http::Request;

    fn parts_for(uri: &str) -> Parts {
        let (parts, _) = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::HOST, "registry-proxy.internal:8080")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_retargets_to_registry_over_https() {
        let mut parts = parts_for("/v2/myimage/manifests/latest");
        let creds = RegistryCredentials::new("AWS", "token");

        rewrite_request(&mut parts, &test_config(), Some(&creds)).unwrap();

        assert_eq!(
            parts.uri.to_string(),
            "https://123456789.dkr.ecr.us-east-1.amazonaws.com/v2/myimage/manifests/latest"
        );
        assert_eq!(parts.headers[header::HOST], REGISTRY);
        assert_eq!(parts.method, "GET");
    }

    #[test]
    fn test_keeps_query_and_ignores_client_authority() {
        let mut parts = parts_for("http://elsewhere.example.com:9999/v2/repo/tags/list?n=10&last=a");

        rewrite_request(&mut parts, &test_config(), None).unwrap();

        assert_eq!(parts.uri.scheme_str(), Some("https"));
        assert_eq!(parts.uri.authority().unwrap().as_str(), REGISTRY);
        assert_eq!(parts.uri.path(), "/v2/repo/tags/list");
        assert_eq!(parts.uri.query(), Some("n=10&last=a"));
    }

    #[test]
    fn test_injects_basic_auth_over_client_authorization() {
        let mut parts = parts_for("/v2/");
        parts
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer client-token"));
        let creds = RegistryCredentials::new("AWS", "ecr-password");

        rewrite_request(&mut parts, &test_config(), Some(&creds)).unwrap();

        let values: Vec<_> = parts.headers.get_all(header::AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        // base64("AWS:ecr-password")
        assert_eq!(values[0], "Basic QVdTOmVjci1wYXNzd29yZA==");
    }

    #[test]
    fn test_without_credentials_strips_client_authorization() {
        let mut parts = parts_for("/v2/");
        parts
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Y2xpZW50OnNlY3JldA=="));

        rewrite_request(&mut parts, &test_config(), None).unwrap();

        assert!(!parts.headers.contains_key(header::AUTHORIZATION));
        assert_eq!(parts.uri.scheme_str(), Some("https"));
    }

    #[test]
    fn test_strips_forwarding_and_hop_by_hop_headers() {
        let mut parts = parts_for("/v2/");
        parts
            .headers
            .insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        parts
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        parts
            .headers
            .insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        rewrite_request(&mut parts, &test_config(), None).unwrap();

        assert!(!parts.headers.contains_key("x-forwarded-for"));
        assert!(!parts.headers.contains_key(header::CONNECTION));
        assert_eq!(parts.headers[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_upstream_uri_without_path() {
        let uri: Uri = "http://registry-proxy.internal:8080".parse().unwrap();
        let upstream = upstream_uri(&test_config(), &uri).unwrap();
        assert_eq!(
            upstream.to_string(),
            "https://123456789.dkr.ecr.us-east-1.amazonaws.com/"
        );
    }

    struct FailingProvider;

    #[async_trait]
    impl CredentialsProvider for FailingProvider {
        async fn get_credentials(&self, _registry_host: &str) -> Result<RegistryCredentials> {
            anyhow::bail!("no credentials available")
        }

        fn provider_type(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_fetch_credentials_failure_yields_none() {
        assert!(fetch_credentials(&FailingProvider, REGISTRY).await.is_none());
    }

    #[test]
    fn test_dot_segments_detected() {
        assert!(has_dot_segments("/v2/a/../c"));
        assert!(has_dot_segments("/v2/a/./c"));
        assert!(has_dot_segments("/v2/a/%2e%2e/b"));
        assert!(has_dot_segments("/v2/a/%2E./b"));
        assert!(has_dot_segments("/v2/a/.%2e"));
    }

    #[test]
    fn test_regular_registry_paths_have_no_dot_segments() {
        assert!(!has_dot_segments("/"));
        assert!(!has_dot_segments("/v2/"));
        assert!(!has_dot_segments("/v2/my.app/manifests/v1.2.3"));
        assert!(!has_dot_segments("/v2/app/blobs/sha256:abc..def"));
        assert!(!has_dot_segments("/v2/app/tags/list?n=10"));
    }
}
