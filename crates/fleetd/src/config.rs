//! fleetd.toml configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetgrid_cloud::CloudConfig;
use fleetgrid_lifecycle::LifecycleConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub lifecycle: LifecycleSection,
    pub clouds: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8480,
            data_dir: PathBuf::from("/var/lib/fleetgrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    /// Base URL booted instances use to call back. Defaults to the
    /// server's own address.
    pub callback_base_url: Option<String>,
    pub backend_timeout_secs: u64,
    pub max_parallel: usize,
    pub hostname_attempts: u32,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        let defaults = LifecycleConfig::default();
        Self {
            callback_base_url: None,
            backend_timeout_secs: defaults.backend_timeout.as_secs(),
            max_parallel: defaults.max_parallel,
            hostname_attempts: defaults.hostname_attempts,
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lifecycle.max_parallel == 0 {
            anyhow::bail!("lifecycle.max_parallel must be at least 1");
        }
        if self.lifecycle.backend_timeout_secs == 0 {
            anyhow::bail!("lifecycle.backend_timeout_secs must be at least 1");
        }
        if self.lifecycle.hostname_attempts == 0 {
            anyhow::bail!("lifecycle.hostname_attempts must be at least 1");
        }
        if let Some(url) = &self.lifecycle.callback_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("lifecycle.callback_base_url must be an http(s) URL, got '{url}'");
            }
        }
        Ok(())
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let callback_base_url = self.lifecycle.callback_base_url.clone().unwrap_or_else(|| {
            let host = if self.server.bind == "0.0.0.0" {
                "127.0.0.1"
            } else {
                self.server.bind.as_str()
            };
            format!("http://{host}:{}", self.server.port)
        });
        LifecycleConfig {
            callback_base_url,
            backend_timeout: Duration::from_secs(self.lifecycle.backend_timeout_secs),
            max_parallel: self.lifecycle.max_parallel,
            hostname_attempts: self.lifecycle.hostname_attempts,
        }
    }
}
