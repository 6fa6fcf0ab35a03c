//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::errors::DeployError;
use crate::storage::settings::Settings;
use crate::workers::collector;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Key required on every `/manage` request
    pub api_key: SecretString,

    /// Orchestrator configuration
    pub orchestrator: OrchestratorOptions,

    /// Directory holding the `.<appid>.env` files
    pub env_files_dir: PathBuf,

    /// SSH key used by `git clone`
    pub ssh_key_path: Option<PathBuf>,

    /// Enable the periodic garbage collection worker
    pub enable_collector: bool,

    /// Garbage collection worker options
    pub collector: collector::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, DeployError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| DeployError::ConfigError("API_KEY is not set".to_string()))?;

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.host.clone(),
                port: settings.port,
            },
            api_key: SecretString::from(api_key),
            orchestrator: OrchestratorOptions {
                logs_dir: settings.build_logs_dir.clone(),
                dockerfile: settings.dockerfile.clone(),
                default_ports: settings.default_ports.clone(),
            },
            env_files_dir: settings.env_files_dir.clone(),
            ssh_key_path: settings.ssh_key_path.clone(),
            enable_collector: settings.gc_interval_secs > 0,
            collector: collector::Options {
                interval: Duration::from_secs(settings.gc_interval_secs.max(1)),
                ..Default::default()
            },
        })
    }
}

/// Lifecycle options for the server
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7543,
        }
    }
}
