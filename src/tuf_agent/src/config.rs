use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Constants for the fixed on-device layout
/// Default local TUF metadata directory
pub const DEFAULT_METADATA_DIR: &str = "/var/sota/tuf";

/// Trusted root file name inside the metadata directory
pub const DEFAULT_ROOT_FILE: &str = "root.json";

/// Targets cache sub-directory beneath the metadata directory
pub const DEFAULT_TARGETS_SUBDIR: &str = "download";

/// Local configuration store consulted for the routing tag
pub const DEFAULT_SOTA_CONFIG: &str = "/var/sota/sota.toml";

/// Request header carrying the routing tag
pub const DEFAULT_TAG_HEADER: &str = "x-ats-tags";

/// Configuration key holding the routing tag
pub const DEFAULT_TAG_KEY: &str = "pacman.tags";

/// Default control API port
pub const DEFAULT_PORT: u16 = 9080;

/// What to do with a refresh trigger that arrives while one is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrentRefresh {
    /// Wait for the in-flight refresh, then run a full attempt
    #[default]
    Queue,
    /// Fail immediately with a busy error
    Reject,
}

impl<'de> serde::Deserialize<'de> for ConcurrentRefresh {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            serde::de::Error::custom(format!(
                "unknown variant `{}`, expected one of `queue`, `reject`",
                s
            ))
        })
    }
}

impl std::str::FromStr for ConcurrentRefresh {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queue" => Ok(ConcurrentRefresh::Queue),
            "reject" => Ok(ConcurrentRefresh::Reject),
            _ => Err(format!("Unknown concurrent refresh policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub tuf: TufConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    // Operator surface; loopback only unless configured otherwise
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControlPlaneConfig {
    /// Device gateway configuration endpoint, e.g. `https://gw.example.com/config`
    #[serde(default)]
    pub config_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TufConfig {
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: PathBuf,
    #[serde(default = "default_root_file")]
    pub root_file: String,
    #[serde(default = "default_targets_subdir")]
    pub targets_subdir: String,
    #[serde(default = "default_sota_config")]
    pub sota_config: PathBuf,
    #[serde(default = "default_tag_header")]
    pub tag_header: String,
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
}

impl Default for TufConfig {
    fn default() -> Self {
        Self {
            metadata_dir: default_metadata_dir(),
            root_file: default_root_file(),
            targets_subdir: default_targets_subdir(),
            sota_config: default_sota_config(),
            tag_header: default_tag_header(),
            tag_key: default_tag_key(),
        }
    }
}

impl TufConfig {
    pub fn root_path(&self) -> PathBuf {
        self.metadata_dir.join(&self.root_file)
    }

    pub fn targets_dir(&self) -> PathBuf {
        self.metadata_dir.join(&self.targets_subdir)
    }
}

fn default_metadata_dir() -> PathBuf {
    PathBuf::from(DEFAULT_METADATA_DIR)
}

fn default_root_file() -> String {
    DEFAULT_ROOT_FILE.to_string()
}

fn default_targets_subdir() -> String {
    DEFAULT_TARGETS_SUBDIR.to_string()
}

fn default_sota_config() -> PathBuf {
    PathBuf::from(DEFAULT_SOTA_CONFIG)
}

fn default_tag_header() -> String {
    DEFAULT_TAG_HEADER.to_string()
}

fn default_tag_key() -> String {
    DEFAULT_TAG_KEY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-fetch timeout handed to the trust engine
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub tls: Option<ClientTlsConfig>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            tls: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout_secs() -> u64 {
    90
}

/// TLS material for the device gateway connection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientTlsConfig {
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default)]
    pub concurrent: ConcurrentRefresh,
    /// Refresh from the remote repository once before serving
    #[serde(default = "default_true")]
    pub on_startup: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            concurrent: ConcurrentRefresh::default(),
            on_startup: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: AgentConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(AgentError::Config(
                "http.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tuf.root_file.is_empty() {
            return Err(AgentError::Config("tuf.root_file must be set".to_string()));
        }
        if self.tuf.tag_header.is_empty() {
            return Err(AgentError::Config("tuf.tag_header must be set".to_string()));
        }
        if !self.control_plane.config_url.is_empty()
            && !self.control_plane.config_url.starts_with("http://")
            && !self.control_plane.config_url.starts_with("https://")
        {
            return Err(AgentError::Config(format!(
                "control_plane.config_url must be an http(s) URL: {}",
                self.control_plane.config_url
            )));
        }
        if let Some(tls) = &self.http.tls {
            if tls.client_cert_path.is_some() != tls.client_key_path.is_some() {
                return Err(AgentError::Config(
                    "http.tls.client_cert_path and client_key_path must be set together"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http.timeout_secs)
    }
}
