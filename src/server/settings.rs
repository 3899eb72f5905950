use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Deserializer};
use std::env;

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub registry: RegistrySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Interface to bind the listener on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on. Also used as the port of rewritten redirect locations.
    #[serde(default = "default_port", deserialize_with = "from_str_or_value")]
    pub port: u16,

    /// Hostname clients use to reach the proxy (e.g., "registry-proxy.internal")
    /// Required unless `rewrite_redirects` is disabled.
    #[serde(default)]
    pub public_hostname: String,

    /// Scheme used for rewritten redirect locations
    #[serde(default)]
    pub public_scheme: PublicScheme,

    /// Rewrite upstream `Location` headers to point back at the proxy (default: true)
    #[serde(
        default = "default_rewrite_redirects",
        deserialize_with = "from_str_or_value"
    )]
    pub rewrite_redirects: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rewrite_redirects() -> bool {
    true
}

/// Scheme clients use to reach the proxy
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublicScheme {
    /// The listener speaks plain HTTP
    #[default]
    Http,
    /// A TLS-terminating load balancer sits in front of the proxy
    Https,
}

impl PublicScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicScheme::Http => "http",
            PublicScheme::Https => "https",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    /// Upstream registry host, e.g. "123456789012.dkr.ecr.us-east-1.amazonaws.com"
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub credentials: CredentialsSettings,
}

/// Source of the credentials injected into upstream requests
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CredentialsSettings {
    /// Fetch authorization tokens from AWS ECR
    Ecr {
        /// AWS region; derived from the registry host when not set
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        /// Upper bound on how long a token is cached (default: 3600)
        #[serde(
            default = "default_cache_ttl_secs",
            deserialize_with = "from_str_or_value"
        )]
        cache_ttl_secs: u64,
        /// Refetch a cached token once it is this close to expiring (default: 300)
        #[serde(
            default = "default_refresh_margin_secs",
            deserialize_with = "from_str_or_value"
        )]
        refresh_margin_secs: u64,
    },
    /// Fixed username and password, e.g. for registries with long-lived robot accounts
    Static { username: String, password: String },
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_refresh_margin_secs() -> u64 {
    300
}

impl Default for CredentialsSettings {
    fn default() -> Self {
        CredentialsSettings::Ecr {
            region: None,
            access_key_id: None,
            secret_access_key: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            refresh_margin_secs: default_refresh_margin_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingSettings {
    /// Log upstream response status/headers and redirect rewrites
    #[serde(default, deserialize_with = "from_str_or_value")]
    pub debug: bool,
}

/// Accept either a native value or its string form
///
/// Environment variables always arrive as strings. Only fields that are not
/// strings parse them, so a numeric-looking password stays a string.
fn from_str_or_value<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
    T::Err: std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrValue<T> {
        String(String),
        Value(T),
    }

    match StringOrValue::<T>::deserialize(deserializer)? {
        StringOrValue::String(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid value '{}': {}", s, e))),
        StringOrValue::Value(value) => Ok(value),
    }
}

/// Values supplied on the command line; these take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub config_file: Option<String>,
    pub port: Option<u16>,
    pub debug: Option<bool>,
    pub registry_host: Option<String>,
    pub public_hostname: Option<String>,
}

impl Settings {
    /// Substitute environment variables in a string value
    /// Replaces ${VAR_NAME} or ${VAR_NAME:-default} with environment variable values
    fn substitute_env_vars_in_string(s: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(s, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match env::var(var_name) {
                    Ok(val) => val,
                    Err(_) => default_value.unwrap_or("").to_string(),
                }
            })
            .to_string()
    }

    /// Convert a config::Value to a serde_json::Value, performing environment variable substitution
    fn config_value_to_json(value: &config::Value) -> serde_json::Value {
        use config::ValueKind;

        match &value.kind {
            ValueKind::Nil => serde_json::Value::Null,
            ValueKind::Boolean(b) => serde_json::Value::Bool(*b),
            ValueKind::I64(i) => serde_json::Value::Number((*i).into()),
            ValueKind::I128(i) => serde_json::Value::Number((*i as i64).into()),
            ValueKind::U64(u) => serde_json::Value::Number((*u).into()),
            ValueKind::U128(u) => serde_json::Value::Number((*u as u64).into()),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueKind::String(s) => {
                serde_json::Value::String(Self::substitute_env_vars_in_string(s))
            }
            ValueKind::Table(table) => {
                let mut map = serde_json::Map::new();
                for (k, v) in table.iter() {
                    map.insert(k.clone(), Self::config_value_to_json(v));
                }
                serde_json::Value::Object(map)
            }
            ValueKind::Array(arr) => {
                let vec: Vec<serde_json::Value> =
                    arr.iter().map(Self::config_value_to_json).collect();
                serde_json::Value::Array(vec)
            }
        }
    }

    /// Try to add a config file with multiple extension attempts (.toml, .yaml, .yml)
    /// Returns Ok(true) if a file was loaded, Ok(false) if no file was found
    fn try_add_config_file(
        builder: &mut config::ConfigBuilder<config::builder::DefaultState>,
        config_dir: &str,
        name: &str,
    ) -> Result<bool, ConfigError> {
        let extensions = ["toml", "yaml", "yml"];

        for ext in extensions {
            let path = format!("{}/{}.{}", config_dir, name, ext);
            if std::path::Path::new(&path).exists() {
                tracing::info!("Loading config file: {}", path);
                *builder = builder
                    .clone()
                    .add_source(config::File::with_name(&format!("{}/{}", config_dir, name)));
                return Ok(true);
            }
        }

        tracing::debug!(
            "Optional config file not found: {}/{}.{{toml,yaml,yml}}",
            config_dir,
            name
        );
        Ok(false)
    }

    /// Load settings from (lowest to highest precedence) defaults, a config file,
    /// `ECR_PROXY_*` environment variables and command-line overrides
    pub fn new(overrides: &SettingsOverrides) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match &overrides.config_file {
            Some(path) => {
                tracing::info!("Loading config file: {}", path);
                builder = builder.add_source(config::File::with_name(path));
            }
            None => {
                let config_dir =
                    env::var("ECR_PROXY_CONFIG_DIR").unwrap_or_else(|_| "config".into());
                Self::try_add_config_file(&mut builder, &config_dir, "default")?;
            }
        }

        // e.g. ECR_PROXY_REGISTRY__HOST, ECR_PROXY_SERVER__PORT
        // Values stay strings; numeric and boolean fields parse them on deserialize.
        builder = builder.add_source(
            Environment::with_prefix("ECR_PROXY")
                .prefix_separator("_")
                .separator("__"),
        );

        if let Some(port) = overrides.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(debug) = overrides.debug {
            builder = builder.set_override("logging.debug", debug)?;
        }
        if let Some(host) = &overrides.registry_host {
            builder = builder.set_override("registry.host", host.as_str())?;
        }
        if let Some(hostname) = &overrides.public_hostname {
            builder = builder.set_override("server.public_hostname", hostname.as_str())?;
        }

        let config = builder.build()?;

        let root_value = config
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let mut json_map = serde_json::Map::new();
        for (k, v) in root_value.iter() {
            json_map.insert(k.clone(), Self::config_value_to_json(v));
        }
        // Sections may be absent entirely when everything comes from the command line
        for section in ["server", "registry", "logging"] {
            json_map
                .entry(section)
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        }
        let json_value = serde_json::Value::Object(json_map);

        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(json_value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in proxy config: {}", field);
        }

        settings.registry.host = normalize_registry_host(&settings.registry.host);
        settings.server.public_hostname = settings.server.public_hostname.trim().to_string();
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.host.is_empty() {
            return Err(ConfigError::Message(
                "registry.host must be set (--ecr-registry or ECR_PROXY_REGISTRY__HOST)"
                    .to_string(),
            ));
        }

        if self
            .registry
            .host
            .parse::<axum::http::uri::Authority>()
            .is_err()
        {
            return Err(ConfigError::Message(format!(
                "registry.host is not a valid host: '{}'",
                self.registry.host
            )));
        }

        if self.server.rewrite_redirects && self.server.public_hostname.trim().is_empty() {
            return Err(ConfigError::Message(
                "server.public_hostname must be set (--proxy-hostname or ECR_PROXY_SERVER__PUBLIC_HOSTNAME)"
                    .to_string(),
            ));
        }

        if !self.server.public_hostname.is_empty()
            && !is_bare_host(&self.server.public_hostname)
        {
            return Err(ConfigError::Message(format!(
                "server.public_hostname must be a bare hostname without scheme, port or path: '{}'",
                self.server.public_hostname
            )));
        }

        if let CredentialsSettings::Ecr {
            access_key_id,
            secret_access_key,
            ..
        } = &self.registry.credentials
        {
            if access_key_id.is_some() != secret_access_key.is_some() {
                return Err(ConfigError::Message(
                    "registry.credentials: access_key_id and secret_access_key must be set together"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Strip a scheme prefix and trailing slashes so the host can be used as an authority
fn normalize_registry_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// A hostname or IP address with nothing else attached
fn is_bare_host(hostname: &str) -> bool {
    !hostname.contains('/')
        && (hostname.starts_with('[') || !hostname.contains(':'))
        && url::Host::parse(hostname).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn overrides_with_file(path: &std::path::Path) -> SettingsOverrides {
        SettingsOverrides {
            config_file: Some(path.to_str().unwrap().to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("ECRPX_TEST_VAR", "test_value");
        let result = Settings::substitute_env_vars_in_string("${ECRPX_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("ECRPX_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("ECRPX_MISSING_VAR");
        let result =
            Settings::substitute_env_vars_in_string("${ECRPX_MISSING_VAR:-default_value}");
        assert_eq!(result, "default_value");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        let result = Settings::substitute_env_vars_in_string("plain_value");
        assert_eq!(result, "plain_value");
    }

    #[test]
    fn test_overrides_only() {
        let settings = Settings::new(&SettingsOverrides {
            config_file: None,
            port: None,
            debug: None,
            registry_host: Some("123456789012.dkr.ecr.us-east-1.amazonaws.com".to_string()),
            public_hostname: Some("registry-proxy.internal".to_string()),
        })
        .unwrap();

        assert_eq!(
            settings.registry.host,
            "123456789012.dkr.ecr.us-east-1.amazonaws.com"
        );
        assert_eq!(settings.server.public_hostname, "registry-proxy.internal");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.public_scheme, PublicScheme::Http);
        assert!(settings.server.rewrite_redirects);
        assert!(!settings.logging.debug);
        assert!(matches!(
            settings.registry.credentials,
            CredentialsSettings::Ecr { .. }
        ));
    }

    #[test]
    fn test_missing_registry_is_an_error() {
        let err = Settings::new(&SettingsOverrides {
            public_hostname: Some("registry-proxy.internal".to_string()),
            ..Default::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("registry.host"));
    }

    #[test]
    fn test_missing_public_hostname_is_an_error() {
        let err = Settings::new(&SettingsOverrides {
            registry_host: Some("registry.example.com".to_string()),
            ..Default::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("public_hostname"));
    }

    #[test]
    fn test_file_with_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.yaml");

        fs::write(
            &config_path,
            r#"
server:
  port: 9000
  public_hostname: "from-file.internal"
  public_scheme: "https"

registry:
  host: "https://registry.example.com/"
  credentials:
    type: "static"
    username: "robot"
    password: "hunter2"

logging:
  debug: true
"#,
        )
        .unwrap();

        let mut overrides = overrides_with_file(&config_path);
        overrides.port = Some(8443);

        let settings = Settings::new(&overrides).unwrap();

        assert_eq!(settings.server.port, 8443);
        assert_eq!(settings.server.public_hostname, "from-file.internal");
        assert_eq!(settings.server.public_scheme, PublicScheme::Https);
        assert_eq!(settings.registry.host, "registry.example.com");
        assert!(settings.logging.debug);
        match settings.registry.credentials {
            CredentialsSettings::Static { username, password } => {
                assert_eq!(username, "robot");
                assert_eq!(password, "hunter2");
            }
            other => panic!("expected static credentials, got {:?}", other),
        }
    }

    #[test]
    fn test_rewrite_disabled_does_not_need_public_hostname() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.toml");

        fs::write(
            &config_path,
            r#"
[server]
rewrite_redirects = false

[registry]
host = "registry.example.com:5000"
"#,
        )
        .unwrap();

        let settings = Settings::new(&overrides_with_file(&config_path)).unwrap();

        assert!(!settings.server.rewrite_redirects);
        assert_eq!(settings.registry.host, "registry.example.com:5000");
    }

    #[test]
    fn test_unused_fields_do_not_fail() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.yaml");

        fs::write(
            &config_path,
            r#"
server:
  public_hostname: "registry-proxy.internal"
  unknown_field: "should trigger warning"

registry:
  host: "registry.example.com"

unknown_top_level: "also unknown"
"#,
        )
        .unwrap();

        let result = Settings::new(&overrides_with_file(&config_path));
        assert!(
            result.is_ok(),
            "Config should load despite unknown fields: {:?}",
            result.err()
        );
    }

    #[test]
    fn test_partial_static_aws_keys_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.yaml");

        fs::write(
            &config_path,
            r#"
server:
  public_hostname: "registry-proxy.internal"

registry:
  host: "123456789012.dkr.ecr.us-east-1.amazonaws.com"
  credentials:
    type: "ecr"
    access_key_id: "AKIAEXAMPLE"
"#,
        )
        .unwrap();

        let err = Settings::new(&overrides_with_file(&config_path)).unwrap_err();
        assert!(err.to_string().contains("access_key_id"));
    }

    #[test]
    fn test_normalize_registry_host() {
        assert_eq!(
            normalize_registry_host("https://registry.example.com/"),
            "registry.example.com"
        );
        assert_eq!(
            normalize_registry_host(" registry.example.com:5000 "),
            "registry.example.com:5000"
        );
    }

    fn overrides_with_public_hostname(hostname: &str) -> SettingsOverrides {
        SettingsOverrides {
            registry_host: Some("registry.example.com".to_string()),
            public_hostname: Some(hostname.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_public_hostname_with_scheme_rejected() {
        let err = Settings::new(&overrides_with_public_hostname(
            "http://registry-proxy.internal",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("server.public_hostname"));
    }

    #[test]
    fn test_public_hostname_with_port_rejected() {
        let err = Settings::new(&overrides_with_public_hostname(
            "registry-proxy.internal:9000",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("server.public_hostname"));
    }

    #[test]
    fn test_public_hostname_bare_hosts_accepted() {
        for hostname in ["registry-proxy.internal", " 10.0.0.5 ", "[::1]"] {
            let settings = Settings::new(&overrides_with_public_hostname(hostname)).unwrap();
            assert_eq!(settings.server.public_hostname, hostname.trim());
        }
    }

    #[test]
    fn test_is_bare_host() {
        assert!(is_bare_host("registry-proxy.internal"));
        assert!(is_bare_host("localhost"));
        assert!(is_bare_host("192.168.1.10"));
        assert!(is_bare_host("[2001:db8::1]"));
        assert!(!is_bare_host("https://registry-proxy.internal"));
        assert!(!is_bare_host("registry-proxy.internal:9000"));
        assert!(!is_bare_host("registry-proxy.internal/v2"));
        assert!(!is_bare_host("[::1]:9000"));
        assert!(!is_bare_host("bad host"));
    }

    #[test]
    fn test_numeric_looking_strings_stay_strings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.yaml");

        // Same shape the environment source produces: every value is a string
        fs::write(
            &config_path,
            r#"
server:
  port: "9000"
  rewrite_redirects: "false"

registry:
  host: "registry.example.com"
  credentials:
    type: "static"
    username: "007"
    password: "123456"

logging:
  debug: "true"
"#,
        )
        .unwrap();

        let settings = Settings::new(&overrides_with_file(&config_path)).unwrap();

        assert_eq!(settings.server.port, 9000);
        assert!(!settings.server.rewrite_redirects);
        assert!(settings.logging.debug);
        match settings.registry.credentials {
            CredentialsSettings::Static { username, password } => {
                assert_eq!(username, "007");
                assert_eq!(password, "123456");
            }
            other => panic!("expected static credentials, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_numeric_string_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("proxy.toml");

        fs::write(
            &config_path,
            r#"
[server]
port = "not-a-port"
rewrite_redirects = false

[registry]
host = "registry.example.com"
"#,
        )
        .unwrap();

        let err = Settings::new(&overrides_with_file(&config_path)).unwrap_err();
        assert!(err.to_string().contains("not-a-port"));
    }
}
