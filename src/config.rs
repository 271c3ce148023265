use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::policy::AddressPolicy;

pub const IPAM_COMMAND_KEY: &str = "ipam_command";
pub const ISOLATOR_COMMAND_KEY: &str = "isolator_command";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipam_command: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolator_command: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Unset means helpers may run forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper_timeout_secs: Option<u64>,
    pub max_concurrent_helpers: usize,
    pub address_policies: Vec<AddressPolicy>,
    pub address_env_var: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ipam_command: None,
            isolator_command: None,
            hostname: None,
            helper_timeout_secs: None,
            max_concurrent_helpers: 8,
            address_policies: AddressPolicy::default_chain(),
            address_env_var: "NETBIND_IP".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("netbind.toml"))
            .merge(Json::file("netbind.json"))
            .merge(Env::prefixed("NETBIND_"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.ipam_path()?;
        Ok(config)
    }

    /// Build a configuration from the orchestrator's key/value module
    /// parameters.  Keys this crate does not know are skipped.
    pub fn from_parameters<K, V>(parameters: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Config::default();
        for (key, value) in parameters {
            let value = value.as_ref();
            match key.as_ref() {
                IPAM_COMMAND_KEY => config.ipam_command = Some(PathBuf::from(value)),
                ISOLATOR_COMMAND_KEY => config.isolator_command = Some(PathBuf::from(value)),
                "hostname" => config.hostname = Some(value.to_string()),
                "helper_timeout_secs" => {
                    config.helper_timeout_secs = Some(value.parse().map_err(|_| {
                        Error::Config(format!("invalid helper_timeout_secs '{}'", value))
                    })?)
                }
                "max_concurrent_helpers" => {
                    config.max_concurrent_helpers = value.parse().map_err(|_| {
                        Error::Config(format!("invalid max_concurrent_helpers '{}'", value))
                    })?
                }
                other => debug!("Ignoring unknown parameter '{}'", other),
            }
        }
        config.ipam_path()?;
        Ok(config)
    }

    pub fn ipam_path(&self) -> Result<&Path> {
        match self.ipam_command.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(Error::Config("IPAM path not specified".into())),
        }
    }

    pub fn isolator_path(&self) -> Option<&Path> {
        self.isolator_command
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn helper_timeout(&self) -> Option<Duration> {
        self.helper_timeout_secs.map(Duration::from_secs)
    }

    /// Hostname sent to the helpers: configured value, then `HOSTNAME`,
    /// then the kernel's idea of it.
    pub fn resolve_hostname(&self) -> Result<String> {
        if let Some(name) = self.hostname.as_ref().filter(|h| !h.is_empty()) {
            return Ok(name.clone());
        }
        if let Ok(name) = std::env::var("HOSTNAME") {
            if !name.is_empty() {
                return Ok(name);
            }
        }
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("Failed to get hostname".into()))
    }
}
