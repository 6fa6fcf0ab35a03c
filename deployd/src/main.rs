//! deployd - Entry Point
//!
//! Deployment server that rebuilds an application's container from its git
//! checkout on request and swaps it in for the running one.

use std::collections::HashMap;
use std::env;

use deployd::app::options::AppOptions;
use deployd::app::run::run;
use deployd::logs::{init_logging, LogOptions};
use deployd::storage::settings::Settings;
use deployd::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Retrieve the settings
    let mut settings = match cli_args.get("settings") {
        Some(path) => match load_settings_file(path).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {}: {}", path, e);
                return;
            }
        },
        None => Settings::default(),
    };
    if let Err(e) = settings.apply_env() {
        eprintln!("Invalid environment: {}", e);
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = match AppOptions::from_settings(&settings) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return;
        }
    };

    info!(
        "Running deployd {} ({}) with options: {:?}",
        version.version, version.git_hash, options
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the deployment server: {e}");
    }
}

async fn load_settings_file(path: &str) -> Result<Settings, deployd::errors::DeployError> {
    let contents = tokio::fs::read_to_string(path).await?;
    Settings::from_json(&contents)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
