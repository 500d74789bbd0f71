//! jlr2mqtt - Entry Point
//!
//! Bridges the JLR InControl vehicle API to an MQTT broker.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use jlr2mqtt::app::options::AppOptions;
use jlr2mqtt::app::run::run;
use jlr2mqtt::filesys::file::ConfigFile;
use jlr2mqtt::logs::{init_logging, LogOptions};
use jlr2mqtt::storage::settings::Settings;
use jlr2mqtt::utils::version_info;

use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "/etc/jlr2mqtt/settings.json";

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
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Retrieve the settings file
    let config_path = cli_args
        .get("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let settings = match Settings::load(&ConfigFile::new(&config_path)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let log_handle = match init_logging(log_options) {
        Ok(handle) => Some(Arc::new(handle)),
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the bridge
    let options = AppOptions::from_settings(&settings, &version.version);
    info!("Running jlr2mqtt with options: {:?}", options);
    let result = run(
        version.version,
        settings,
        options,
        log_handle,
        await_shutdown_signal(),
    )
    .await;
    if let Err(e) = result {
        error!("Failed to run the bridge: {e}");
        std::process::exit(1);
    }
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
