//! visagent - Entry Point
//!
//! Runs a trained vision model over a camera, an uploaded video, a folder of
//! images or frames received over MQTT, and publishes the results.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use visagent::app::options::SourceChoice;
use visagent::app::run::run;
use visagent::errors::DeployError;
use visagent::filesys::file::File;
use visagent::logs::init_logging;
use visagent::storage::settings::Settings;
use visagent::utils::version_info;

use tracing::{error, info, warn};

const DEFAULT_SETTINGS_FILE: &str = "settings.json";

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
            Err(e) => eprintln!("Failed to serialize version info: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("settings")
        .map(String::as_str)
        .unwrap_or(DEFAULT_SETTINGS_FILE);
    let settings = match File::new(settings_path).read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {}", settings_path, e);
            std::process::exit(1);
        }
    };

    // Initialize logging; the guard flushes file logs on exit
    let _log_guard = match init_logging(settings.log_options()) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    if let Err(e) = settings.validate() {
        error!("Invalid settings in {}: {}", settings_path, e);
        std::process::exit(1);
    }

    let mut options = settings.app_options();
    options.source.choice = match source_choice(&cli_args) {
        Ok(choice) => choice,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if cli_args.contains_key("delete-video") {
        options.source.delete_uploaded_video = true;
    }
    if cli_args.contains_key("persistent") {
        options.lifecycle.is_persistent = true;
    }

    info!("Running visagent with options: {:?}", options);
    let result = run(version.version, options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the deployment: {e}");
        std::process::exit(1);
    }
}

/// `--video=<path>` and `--images=<dir>` imply their source; `--source=`
/// picks camera or mqtt, or names the file source whose path is given
fn source_choice(cli_args: &HashMap<String, String>) -> Result<Option<SourceChoice>, DeployError> {
    let video = cli_args.get("video").map(PathBuf::from);
    let images = cli_args.get("images").map(PathBuf::from);

    match cli_args.get("source").map(|s| s.to_lowercase()).as_deref() {
        None => Ok(video
            .map(SourceChoice::Video)
            .or(images.map(SourceChoice::Images))),
        Some("video") => video
            .map(|path| Some(SourceChoice::Video(path)))
            .ok_or_else(|| DeployError::ConfigError("--source=video needs --video=<path>".to_string())),
        Some("images") => images
            .map(|dir| Some(SourceChoice::Images(dir)))
            .ok_or_else(|| DeployError::ConfigError("--source=images needs --images=<dir>".to_string())),
        Some(other) => other.parse::<SourceChoice>().map(Some),
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Unable to install signal handlers, falling back to Ctrl+C: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl+C: {}", e);
                    }
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
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
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
