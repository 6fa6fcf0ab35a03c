//! Server settings
//!
//! Read from an optional JSON file, then overridden by environment variables
//! (which `main` first loads from `.env`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::logs::LogLevel;

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Directory for rolling server log files
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Key every `/manage` request must present in `X-Api-Key`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Root directory of the build logs
    #[serde(default = "default_build_logs_dir")]
    pub build_logs_dir: PathBuf,

    /// Directory holding the `.<appid>.env` files
    #[serde(default = "default_env_files_dir")]
    pub env_files_dir: PathBuf,

    /// Private key used to clone over SSH
    #[serde(default)]
    pub ssh_key_path: Option<PathBuf>,

    /// Port spec used when neither the request nor the app configures one
    #[serde(default = "default_ports")]
    pub default_ports: String,

    /// Build descriptor file name
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    /// Seconds between garbage collection passes, 0 disables them
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7543
}

fn default_build_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_env_files_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_ports() -> String {
    "127.0.0.1:3002:3002".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_gc_interval() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            host: default_host(),
            port: default_port(),
            api_key: None,
            build_logs_dir: default_build_logs_dir(),
            env_files_dir: default_env_files_dir(),
            ssh_key_path: None,
            default_ports: default_ports(),
            dockerfile: default_dockerfile(),
            gc_interval_secs: default_gc_interval(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON document
    pub fn from_json(contents: &str) -> Result<Self, DeployError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) -> Result<(), DeployError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`; empty values are ignored
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level.parse().map_err(DeployError::ConfigError)?;
        }
        if let Some(json) = var("LOG_JSON") {
            self.log_json = parse_bool("LOG_JSON", &json)?;
        }
        if let Some(dir) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| DeployError::ConfigError(format!("PORT is not a port: {}", port)))?;
        }
        if let Some(key) = var("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(dir) = var("BUILD_LOGS_DIR") {
            self.build_logs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("ENV_FILES_DIR") {
            self.env_files_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("SSH_KEY_PATH") {
            self.ssh_key_path = Some(PathBuf::from(path));
        }
        if let Some(ports) = var("DEFAULT_PORTS") {
            self.default_ports = ports;
        }
        if let Some(dockerfile) = var("DOCKERFILE") {
            self.dockerfile = dockerfile;
        }
        if let Some(secs) = var("GC_INTERVAL_SECS") {
            self.gc_interval_secs = secs.trim().parse().map_err(|_| {
                DeployError::ConfigError(format!("GC_INTERVAL_SECS is not a number: {}", secs))
            })?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, DeployError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DeployError::ConfigError(format!(
            "{} is not a boolean: {}",
            key, value
        ))),
    }
}
