//! Application configuration.
//!
//! Layered, lowest precedence first:
//! defaults -> YAML file (`--config`) -> env (`SVC_COLLECTOR__*`) -> CLI overrides.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use registration::{BackendConfig, RegistrationConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Prefix of environment overrides; `__` separates nested keys,
/// e.g. `SVC_COLLECTOR__SERVER__PORT=6000`.
pub const ENV_PREFIX: &str = "SVC_COLLECTOR__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to render configuration: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Listen host; `""` or `"*"` listens on every interface
    pub host: String,
    /// Listen port; `0` picks a free one
    pub port: u16,
    /// Host announced to peers instead of the listen host
    pub advertise_host: Option<String>,
    /// Upper bound for delivering deregistrations on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "*".to_owned(),
            port: 50051,
            advertise_host: None,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Host to pass to the socket bind.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        if is_wildcard(&self.host) {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The `host:port` this process announces, given the address it actually bound.
    ///
    /// # Errors
    /// Returns an error if the host is a wildcard and no local IP can be detected.
    pub fn advertised_address(&self, bound: SocketAddr) -> Result<String, ConfigError> {
        resolve_advertised(
            self.advertise_host.as_deref(),
            &self.host,
            bound.port(),
            || local_ip_address::local_ip().ok(),
        )
    }
}

fn is_wildcard(host: &str) -> bool {
    host.is_empty() || host == "*" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified())
}

fn resolve_advertised<F>(
    advertise_host: Option<&str>,
    host: &str,
    port: u16,
    local_ip: F,
) -> Result<String, ConfigError>
where
    F: FnOnce() -> Option<IpAddr>,
{
    let candidate = advertise_host.filter(|h| !h.is_empty()).unwrap_or(host);

    if is_wildcard(candidate) {
        let ip = local_ip().ok_or_else(|| {
            ConfigError::Invalid(
                "cannot detect a local IP to advertise; set server.advertise_host".to_owned(),
            )
        })?;
        return Ok(SocketAddr::new(ip, port).to_string());
    }

    match candidate.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, port).to_string()),
        Err(_) => Ok(format!("{candidate}:{port}")),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `info,registration=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0:9090".to_owned(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then the optional YAML file, then environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file is missing, a layer cannot be parsed, or the
    /// result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_path_buf()));
            }
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        config.validate()?;
        Ok(config)
    }

    /// Apply command line flags on top of the loaded layers.
    pub fn apply_cli_overrides(&mut self, port: Option<u16>, verbose: u8) {
        if let Some(port) = port {
            self.server.port = port;
        }

        let level = match verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        };
        if let Some(level) = level {
            level.clone_into(&mut self.logging.level);
        }
    }

    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration.service_name.is_empty() {
            return Err(ConfigError::Invalid(
                "registration.service_name must not be empty".to_owned(),
            ));
        }

        if let BackendConfig::Directory(dir) = &self.registration.backend {
            dir.validate()
                .map_err(|e| ConfigError::Invalid(format!("registration.backend: {e}")))?;
        }

        EnvFilter::try_new(&self.logging.level).map_err(|e| {
            ConfigError::Invalid(format!("logging.level '{}': {e}", self.logging.level))
        })?;

        if self.metrics.enabled {
            self.metrics.listen_addr.parse::<SocketAddr>().map_err(|e| {
                ConfigError::Invalid(format!(
                    "metrics.listen_addr '{}': {e}",
                    self.metrics.listen_addr
                ))
            })?;
        }

        Ok(())
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_saphyr::to_string(self).map_err(|e| ConfigError::Render(e.to_string()))
    }
}
