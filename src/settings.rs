use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::target::{Credentials, ProviderTarget};

/// Explicit configuration file, tilde-expanded.
pub const CONFIG_PATH_VAR: &str = "DDNS_RELAY_CONFIG";
const ENV_PREFIX: &str = "DDNS_RELAY";
const LOCAL_CONFIG: &str = "config.toml";
const SYSTEM_CONFIG: &str = "/etc/ddns-relay/config.toml";

#[derive(Debug, Deserialize)]
pub struct AliyunSettings {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub sync_ipv4: bool,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub listen: SocketAddr,
    pub freshness_window: String,
    pub provider_timeout: String,
    pub log_format: LogFormat,
    pub trust_forwarded_headers: bool,
    /// Hex SHA-256 of the listing password.
    pub password: Option<String>,
    #[serde(default)]
    pub aliyun: HashMap<String, AliyunSettings>,

    /// File the settings were read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        let explicit = std::env::var(CONFIG_PATH_VAR)
            .ok()
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()));

        Self::load(explicit.as_deref())
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("listen", "0.0.0.0:8080")?
            .set_default("freshness_window", "24h")?
            .set_default("provider_timeout", "10s")?
            .set_default("log_format", "text")?
            .set_default("trust_forwarded_headers", true)?
            .add_source(File::with_name(LOCAL_CONFIG).required(false))
            .add_source(File::with_name(SYSTEM_CONFIG).required(false));
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }
        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;
        settings.source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => winning_file(&[Path::new(SYSTEM_CONFIG), Path::new(LOCAL_CONFIG)]),
        };
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        self.freshness_window()?;
        self.provider_timeout()?;

        if let Some(password) = &self.password {
            if !password.is_empty()
                && (password.len() != 64 || !password.chars().all(|c| c.is_ascii_hexdigit()))
            {
                return Err(SettingsError::PasswordHash);
            }
        }
        Ok(())
    }

    pub fn freshness_window(&self) -> Result<Duration, SettingsError> {
        parse_duration("freshness_window", &self.freshness_window)
    }

    pub fn provider_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration("provider_timeout", &self.provider_timeout)
    }

    /// Provider targets keyed by lowercase host name; configuration keys are
    /// case-insensitive.
    pub fn targets(&self) -> HashMap<String, ProviderTarget> {
        self.aliyun
            .iter()
            .map(|(host, s)| {
                let target = ProviderTarget {
                    credentials: Credentials {
                        access_key_id: s.access_key_id.clone(),
                        access_key_secret: s.access_key_secret.clone(),
                        region: s.region.clone(),
                    },
                    endpoint: s.endpoint.clone(),
                    domains: s.domains.clone(),
                    sync_ipv4: s.sync_ipv4,
                };
                (host.to_ascii_lowercase(), target)
            })
            .collect()
    }
}

/// First existing file of `candidates`, given highest priority first. Later
/// builder sources override earlier ones, so this is the file whose values win.
fn winning_file(candidates: &[&Path]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|p| p.is_file())
        .map(|p| p.to_path_buf())
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, SettingsError> {
    humantime::parse_duration(value).map_err(|source| SettingsError::Duration { key, source })
}

/// Writes the listing password hash into the configuration file, keeping
/// every other key. The file is created if missing.
pub async fn persist_password(path: &Path, hash: &str) -> Result<(), SettingsError> {
    let mut table = match tokio::fs::read_to_string(path).await {
        Ok(s) => toml::from_str::<toml::Table>(&s)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
        Err(e) => return Err(e.into()),
    };
    table.insert("password".to_string(), toml::Value::String(hash.to_string()));

    tokio::fs::write(path, toml::to_string(&table)?).await?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid {key}: {source}")]
    Duration {
        key: &'static str,
        source: humantime::DurationError,
    },
    #[error("password must be a hex encoded sha-256 digest")]
    PasswordHash,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to write config file: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}
