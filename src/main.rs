//! `claude-bridge` binary.
//!
//! `run` is what the browser launches as the native messaging host; the
//! remaining subcommands are the operator surface (status, config,
//! manifest install).

use clap::{Parser, Subcommand};
use claude_bridge::bridge::{Bridge, BridgeEvent};
use claude_bridge::config::ConfigManager;
use claude_bridge::decision;
use claude_bridge::detector::{platform_probe, Detector};
use claude_bridge::host::Host;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "claude-bridge", version, about = "Routing native messaging proxy for the Claude browser extension")]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge over stdin/stdout (what the browser invokes).
    Run,
    /// Probe both backends and print the detection snapshot + resolution.
    Status,
    /// Inspect or modify the routing configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Install the native-messaging manifest for this binary.
    #[cfg(feature = "install")]
    Install {
        /// Chromium extension ids to allow.
        #[arg(long = "extension-id")]
        extension_ids: Vec<String>,
        /// Firefox addon ids to allow.
        #[arg(long = "firefox-id")]
        firefox_ids: Vec<String>,
        /// Browsers to install for.
        #[arg(long = "browser", default_values_t = vec!["chrome".to_string(), "firefox".to_string()])]
        browsers: Vec<String>,
        /// Host executable to register (defaults to this binary).
        #[arg(long)]
        executable: Option<PathBuf>,
    },
    /// Remove the native-messaging manifest.
    #[cfg(feature = "install")]
    Uninstall {
        #[arg(long = "browser", default_values_t = vec!["chrome".to_string(), "firefox".to_string()])]
        browsers: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the whole config, or one dotted path.
    Get { key: Option<String> },
    /// Set one dotted path (value parsed as JSON, else taken as a string).
    Set { key: String, value: String },
    /// Print the config file location.
    Path,
    /// Restore defaults.
    Reset,
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    // stderr only: stdout belongs to the protocol when running as a host.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let config = Arc::new(ConfigManager::new(cli.config.clone()));

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_bridge(config).await,
        Command::Status => status(config).await,
        Command::Config { action } => config_command(config, action).await,
        #[cfg(feature = "install")]
        Command::Install {
            extension_ids,
            firefox_ids,
            browsers,
            executable,
        } => install(extension_ids, firefox_ids, browsers, executable),
        #[cfg(feature = "install")]
        Command::Uninstall { browsers } => uninstall(browsers),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_bridge(config: Arc<ConfigManager>) -> Result<(), String> {
    let (host, host_events) = Host::stdio();
    let (bridge, mut events) = Bridge::new(host, host_events, Arc::clone(&config));

    // Pick up edits made by the CLI or by hand while the bridge runs.
    let _config_watch = config.watch_file(Duration::from_secs(2));

    bridge
        .start()
        .await
        .map_err(|e| format!("failed to start bridge: {e}"))?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| format!("failed to install signal handler: {e}"))?;

    loop {
        #[cfg(unix)]
        let terminated = sigterm.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                bridge.stop().await;
                break;
            }
            _ = terminated => {
                tracing::info!("termination signal received, shutting down");
                bridge.stop().await;
                break;
            }
            event = events.recv() => {
                match event {
                    Some(BridgeEvent::Stopped) | None => break,
                    Some(BridgeEvent::Error(err)) if !err.recoverable() => {
                        tracing::error!(code = err.code(), %err, "fatal bridge error");
                    }
                    Some(_) => {}
                }
            }
        }
    }

    Ok(())
}

async fn status(config: Arc<ConfigManager>) -> Result<(), String> {
    config.load().await.map_err(|e| e.to_string())?;
    let detector = Detector::new(platform_probe(), Arc::clone(&config));

    let snapshot = detector.detect_all().await;
    let resolution = decision::decide(&config.current(), &snapshot);

    let output = serde_json::json!({
        "config": &*config.current(),
        "detection": snapshot,
        "resolution": match &resolution {
            Ok(r) => serde_json::to_value(r).unwrap_or_default(),
            Err(e) => serde_json::json!({ "error": e.to_string(), "code": e.code() }),
        },
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?
    );
    Ok(())
}

async fn config_command(config: Arc<ConfigManager>, action: ConfigAction) -> Result<(), String> {
    config.load().await.map_err(|e| e.to_string())?;

    match action {
        ConfigAction::Get { key } => {
            let value = match key {
                Some(key) => config
                    .get_value(&key)
                    .ok_or_else(|| format!("unknown config path \"{key}\""))?,
                None => serde_json::to_value(&*config.current()).map_err(|e| e.to_string())?,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?
            );
        }
        ConfigAction::Set { key, value } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            config
                .set_value(&key, value)
                .await
                .map_err(|e| e.to_string())?;
            println!("ok");
        }
        ConfigAction::Path => println!("{}", config.path().display()),
        ConfigAction::Reset => {
            config.reset().await.map_err(|e| e.to_string())?;
            println!("ok");
        }
    }
    Ok(())
}

#[cfg(feature = "install")]
fn install(
    extension_ids: Vec<String>,
    firefox_ids: Vec<String>,
    browsers: Vec<String>,
    executable: Option<PathBuf>,
) -> Result<(), String> {
    let executable = match executable {
        Some(path) => path,
        None => std::env::current_exe().map_err(|e| e.to_string())?,
    };
    let browsers: Vec<&str> = browsers.iter().map(|b| b.as_str()).collect();

    claude_bridge::install::install(&executable, &extension_ids, &firefox_ids, &browsers)
        .map_err(|e| e.to_string())?;
    println!(
        "installed {} for {}",
        claude_bridge::install::HOST_NAME,
        browsers.join(", ")
    );
    Ok(())
}

#[cfg(feature = "install")]
fn uninstall(browsers: Vec<String>) -> Result<(), String> {
    let browsers: Vec<&str> = browsers.iter().map(|b| b.as_str()).collect();
    claude_bridge::install::remove(&browsers).map_err(|e| e.to_string())?;
    println!("removed {}", claude_bridge::install::HOST_NAME);
    Ok(())
}
