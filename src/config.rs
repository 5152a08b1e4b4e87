use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    pub hosts: BTreeMap<String, HostConfig>,
}

/// One polled machine. `units` order decides both the command order and
/// which section each unit result is read from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(alias = "Address")]
    pub address: String,
    #[serde(default, alias = "Units")]
    pub units: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_program")]
    pub program: String,
    #[serde(default = "default_ssh_args")]
    pub args: Vec<String>,
    /// Human-readable limit for one probe, e.g. `45s`. Unset waits forever.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinksConfig {
    #[serde(default = "default_console")]
    pub console: bool,
    #[serde(default)]
    pub mongodb: Option<MongoSinkConfig>,
    #[serde(default)]
    pub document: Option<DocumentSinkConfig>,
}

/// Target collection for the MongoDB sink. `address` is either a bare
/// `host[:port]` list or a full `mongodb://` URI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MongoSinkConfig {
    #[serde(default = "default_mongo_address")]
    pub address: String,
    #[serde(default = "default_mongo_name")]
    pub database: String,
    #[serde(default = "default_mongo_name")]
    pub collection: String,
    #[serde(default = "default_mongo_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentSinkConfig {
    pub url: String,
    #[serde(default = "default_document_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            args: default_ssh_args(),
            timeout: None,
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            mongodb: None,
            document: None,
        }
    }
}

impl Default for MongoSinkConfig {
    fn default() -> Self {
        Self {
            address: default_mongo_address(),
            database: default_mongo_name(),
            collection: default_mongo_name(),
            timeout_ms: default_mongo_timeout_ms(),
        }
    }
}

impl SshConfig {
    /// Parsed `timeout`; only meaningful after [`Config::validate`] accepted it.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
            .as_deref()
            .and_then(|raw| humantime::parse_duration(raw.trim()).ok())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON in {path}: {source}")]
    ParseJson {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let is_json = path_ref
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let cfg: Config = if is_json {
            Self::from_json(&text).map_err(|source| ConfigError::ParseJson {
                path: path_display,
                source,
            })?
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_display,
                source,
            })?
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Accepts either a full config object or a bare `device -> host` map.
    fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("hosts").is_some() {
            return serde_json::from_value(value);
        }
        let hosts: BTreeMap<String, HostConfig> = serde_json::from_value(value)?;
        Ok(Self::with_hosts(hosts))
    }

    pub fn with_hosts(hosts: BTreeMap<String, HostConfig>) -> Self {
        Self {
            interval_secs: default_interval_secs(),
            listen: None,
            ssh: SshConfig::default(),
            sinks: SinksConfig::default(),
            hosts,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if let Some(listen) = &self.listen {
            if SocketAddr::from_str(listen).is_err() {
                return Err(ConfigError::Validation(format!(
                    "listen '{listen}' must be a host:port socket address"
                )));
            }
        }

        validate_ssh(&self.ssh)?;
        validate_sinks(&self.sinks)?;
        validate_hosts(&self.hosts)?;

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_ssh(cfg: &SshConfig) -> Result<(), ConfigError> {
    if cfg.program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "ssh.program must not be empty".to_string(),
        ));
    }
    if let Some(raw) = &cfg.timeout {
        let timeout = humantime::parse_duration(raw.trim()).map_err(|err| {
            ConfigError::Validation(format!("ssh.timeout '{raw}' is not a duration: {err}"))
        })?;
        if timeout.is_zero() {
            return Err(ConfigError::Validation(
                "ssh.timeout must be greater than zero".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_sinks(cfg: &SinksConfig) -> Result<(), ConfigError> {
    if let Some(mongodb) = &cfg.mongodb {
        validate_mongodb(mongodb)?;
    }
    if let Some(document) = &cfg.document {
        let url = document.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "sinks.document.url '{url}' must be an http(s) URL"
            )));
        }
        if document.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "sinks.document.timeout_ms must be > 0".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_mongodb(cfg: &MongoSinkConfig) -> Result<(), ConfigError> {
    if cfg.address.trim().is_empty() {
        return Err(ConfigError::Validation(
            "sinks.mongodb.address must not be empty".to_string(),
        ));
    }
    let database = cfg.database.as_str();
    if database.is_empty() || database.contains(['/', '\\', '.', ' ', '"', '$']) {
        return Err(ConfigError::Validation(format!(
            "sinks.mongodb.database '{database}' is not a valid database name"
        )));
    }
    let collection = cfg.collection.as_str();
    if collection.trim().is_empty() || collection.contains('$') || collection.starts_with("system.") {
        return Err(ConfigError::Validation(format!(
            "sinks.mongodb.collection '{collection}' is not a valid collection name"
        )));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "sinks.mongodb.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_hosts(hosts: &BTreeMap<String, HostConfig>) -> Result<(), ConfigError> {
    if hosts.is_empty() {
        return Err(ConfigError::Validation(
            "hosts must contain at least one device".to_string(),
        ));
    }
    for (device, host) in hosts {
        if device.trim().is_empty() {
            return Err(ConfigError::Validation(
                "hosts keys must not be empty".to_string(),
            ));
        }
        if host.address.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "hosts '{device}' address must not be empty"
            )));
        }
        for unit in &host.units {
            if unit.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "hosts '{device}' units must not contain empty names"
                )));
            }
            if unit.contains(['\n', '\r']) {
                return Err(ConfigError::Validation(format!(
                    "hosts '{device}' unit '{}' must not contain line breaks",
                    unit.escape_default()
                )));
            }
        }
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    60
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_ssh_args() -> Vec<String> {
    vec!["-o".to_string(), "BatchMode=yes".to_string()]
}

const fn default_console() -> bool {
    true
}

const fn default_document_timeout_ms() -> u64 {
    5000
}

fn default_mongo_address() -> String {
    "localhost".to_string()
}

fn default_mongo_name() -> String {
    "systemstatus".to_string()
}

const fn default_mongo_timeout_ms() -> u64 {
    5000
}
