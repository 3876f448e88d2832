use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use portal_auth::AuthConfig;
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable prefix; `__` separates nesting levels, e.g.
/// `PORTAL__AUTH__PROVIDER=real`.
pub const ENV_PREFIX: &str = "PORTAL__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8087,
        }
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
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// The REST backend that `/api/...` requests are forwarded to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: Option<Url>,
}

impl AppConfig {
    /// Layered load: struct defaults, then the YAML file (if any), then
    /// `PORTAL__*` environment variables.
    ///
    /// Defaults come from `#[serde(default)]` rather than a serialized
    /// provider, since serializing would replace secrets with their redacted
    /// form.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist or any layer does not fit the schema.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            anyhow::ensure!(
                path.is_file(),
                "config file does not exist: {}",
                path.display()
            );
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .context("failed to load portal-server configuration")
    }

    pub fn apply_cli_overrides(&mut self, port: Option<u16>) {
        if let Some(port) = port {
            self.server.port = port;
        }
    }

    /// # Errors
    ///
    /// Reports the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        self.auth.validate().context("invalid auth configuration")?;
        let base_url = self
            .backend
            .base_url
            .as_ref()
            .context("backend.base_url is required")?;
        match base_url.scheme() {
            "https" => Ok(()),
            "http" if self.auth.dispatch.allow_insecure_http => Ok(()),
            "http" => anyhow::bail!(
                "backend.base_url uses http but auth.dispatch.allow_insecure_http is false"
            ),
            other => anyhow::bail!("backend.base_url has unsupported scheme '{other}'"),
        }
    }

    /// Effective configuration as pretty JSON, secrets redacted.
    ///
    /// # Errors
    ///
    /// Only if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to render configuration")
    }
}
