use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::Level;

use crate::codec::DEFAULT_MAX_BODY_SIZE;
use crate::control::ControlOptions;
use crate::worker::reload::expand_pattern;
use crate::worker::{AnnounceConfig, ReloadSource};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterConfig {
    pub server: MasterServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterServerConfig {
    pub tcp_address: String,
    pub http_address: String,
    pub reply_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for MasterServerConfig {
    fn default() -> Self {
        Self {
            tcp_address: "0.0.0.0:9630".to_string(),
            http_address: "0.0.0.0:9631".to_string(),
            reply_timeout_ms: 1000,
            max_frame_bytes: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub server: WorkerServerConfig,
    pub file_paths: Vec<String>,
    pub reload_config: ReloadConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerServerConfig {
    pub master_tcp_address: String,
    pub http_address: String,
    /// Empty means "use the system hostname".
    pub hostname: String,
    pub announce_interval_secs: u64,
    pub reconnect_interval_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for WorkerServerConfig {
    fn default() -> Self {
        Self {
            master_tcp_address: "0.0.0.0:9640".to_string(),
            http_address: "0.0.0.0:9641".to_string(),
            hostname: String::new(),
            announce_interval_secs: 10,
            reconnect_interval_secs: 10,
            max_frame_bytes: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReloadConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// Overrides the announce interval while reloading; 0 keeps it.
    pub period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
    pub output_path: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            output_path: "stdout".to_string(),
        }
    }
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_yaml(&content).with_context(|| format!("Failed to parse YAML file {}", path.display()))
}

fn parse_yaml<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T> {
    if content.trim().is_empty() {
        // An empty document is "all defaults", not an error.
        return Ok(serde_yaml::from_str("{}")?);
    }
    Ok(serde_yaml::from_str(content)?)
}

impl MasterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        parse_yaml(content)
    }

    pub fn control_options(&self) -> ControlOptions {
        ControlOptions {
            reply_timeout: Duration::from_millis(self.server.reply_timeout_ms),
            max_frame_bytes: self.server.max_frame_bytes,
        }
    }
}

impl WorkerConfig {
    /// Load, fill in the hostname and expand the static file globs.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        config.resolve()
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        parse_yaml::<Self>(content)?.resolve()
    }

    fn resolve(mut self) -> Result<Self> {
        if self.server.hostname.trim().is_empty() {
            self.server.hostname = system_hostname()?;
        }

        let mut files = Vec::new();
        for pattern in &self.file_paths {
            files.extend(
                expand_pattern(pattern)
                    .with_context(|| format!("Error retrieving files for {}", pattern))?,
            );
        }
        self.file_paths = files;

        if self.reload_config.enabled && self.reload_config.path.as_os_str().is_empty() {
            bail!("reload_config.enabled requires reload_config.path");
        }
        if self.server.announce_interval_secs == 0 {
            bail!("server.announce_interval_secs must be greater than zero");
        }
        if self.server.reconnect_interval_secs == 0 {
            bail!("server.reconnect_interval_secs must be greater than zero");
        }
        Ok(self)
    }

    pub fn advertised_http_address(&self) -> String {
        format!("http://{}/", self.server.http_address)
    }

    pub fn announce_interval(&self) -> Duration {
        if self.reload_config.enabled && self.reload_config.period_secs > 0 {
            Duration::from_secs(self.reload_config.period_secs)
        } else {
            Duration::from_secs(self.server.announce_interval_secs)
        }
    }

    pub fn announce_config(&self) -> AnnounceConfig {
        AnnounceConfig {
            master_addr: self.server.master_tcp_address.clone(),
            host: self.server.hostname.clone(),
            http_address: self.advertised_http_address(),
            file_paths: self.file_paths.clone(),
            announce_interval: self.announce_interval(),
            reconnect_interval: Duration::from_secs(self.server.reconnect_interval_secs),
            reload: self
                .reload_config
                .enabled
                .then(|| ReloadSource::new(&self.reload_config.path)),
            max_frame_bytes: self.server.max_frame_bytes,
        }
    }
}

fn system_hostname() -> Result<String> {
    let name = hostname::get().context("Error getting hostname")?;
    name.into_string()
        .map_err(|raw| anyhow::anyhow!("Error getting hostname: {:?} is not UTF-8", raw))
}

impl LogConfig {
    pub fn level(&self) -> Result<Level> {
        self.level
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown log level {:?}", self.level))
    }

    /// Install the global `tracing` subscriber.
    pub fn init(&self) -> Result<()> {
        let level = self.level()?;
        let builder = tracing_subscriber::fmt().with_max_level(level);

        let installed = match self.output_path.as_str() {
            "" | "stdout" => builder.try_init(),
            "stderr" => builder.with_writer(std::io::stderr).try_init(),
            path => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path))?;
                builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
            }
        };
        installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
    }
}
