use axum::http::header::{HeaderValue, InvalidHeaderValue};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Registry credentials returned by a [`super::CredentialsProvider`]
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Username for authentication (always "AWS" for ECR)
    pub username: String,
    /// Password or token for authentication
    pub password: String,
    /// When the credentials stop being accepted by the registry, if known
    pub expires_at: Option<DateTime<Utc>>,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Build the `Authorization: Basic ...` header value for these credentials
    ///
    /// The value is marked sensitive so it is never printed by header Debug output.
    pub fn basic_auth_header(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Whether the credentials remain usable for at least `margin` after `now`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + margin < expires_at,
            None => true,
        }
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
