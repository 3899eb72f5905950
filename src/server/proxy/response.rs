use axum::http::{header, HeaderMap, HeaderValue};
use thiserror::Error;
use url::Url;

use super::{headers, ProxyConfig};

#[derive(Debug, Error)]
pub enum RedirectRewriteError {
    #[error("Invalid Location header: {0}")]
    InvalidLocation(#[from] url::ParseError),

    #[error("Location header is not valid ASCII")]
    NonAsciiLocation,

    #[error("Cannot point Location at the proxy: {0}")]
    UnsupportedLocation(String),

    #[error("Rewritten Location is not a valid header value: {0}")]
    InvalidHeaderValue(#[from] header::InvalidHeaderValue),
}

/// Rewrite a redirect target so that it points back at the proxy
///
/// Scheme, host and port are replaced with the proxy's public address; path,
/// query and fragment are preserved. Relative locations are resolved against
/// the proxy's public base URL. Applying this twice gives the same result as
/// applying it once.
pub fn rewrite_location(location: &str, config: &ProxyConfig) -> Result<String, RedirectRewriteError> {
    let mut url = match Url::parse(location) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&config.public_base_url())?.join(location)?
        }
        Err(e) => return Err(e.into()),
    };

    url.set_scheme(config.public_scheme.as_str())
        .map_err(|_| RedirectRewriteError::UnsupportedLocation(location.to_string()))?;
    url.set_host(Some(config.public_hostname.as_str()))?;
    url.set_port(Some(config.port))
        .map_err(|_| RedirectRewriteError::UnsupportedLocation(location.to_string()))?;

    Ok(url.to_string())
}

/// Prepare upstream response headers for the client
///
/// Hop-by-hop headers are dropped and, when redirect rewriting is enabled,
/// `Location` is rewritten. All other headers pass through untouched.
pub fn rewrite_response_headers(
    response_headers: &mut HeaderMap,
    config: &ProxyConfig,
) -> Result<(), RedirectRewriteError> {
    headers::remove_hop_by_hop_headers(response_headers);

    if !config.rewrite_redirects {
        return Ok(());
    }

    let Some(location) = response_headers.get(header::LOCATION) else {
        return Ok(());
    };

    let location = location
        .to_str()
        .map_err(|_| RedirectRewriteError::NonAsciiLocation)?;
    let rewritten = rewrite_location(location, config)?;

    tracing::debug!(from = %location, to = %rewritten, "Rewriting registry redirect");

    response_headers.insert(header::LOCATION, HeaderValue::from_str(&rewritten)?);
    Ok(())
}
