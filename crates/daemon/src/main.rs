//! rserver
//!
//! Session launch manager and terminal engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::Config;
use daemon::orchestrator::{DaemonOrchestrator, OrchestratorEvent};
use daemon::rpc::{get_socket_path, read_running_pid, remove_pid_file, RpcClient};
use serde_json::{json, Value};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// rserver - launches user sessions and hosts their terminals.
#[derive(Parser, Debug)]
#[command(name = "rserver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the server in the foreground
    Start,

    /// Stop the running server
    Stop {
        /// Force immediate termination (SIGKILL)
        #[arg(long, short)]
        force: bool,

        /// Timeout in seconds for graceful shutdown
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Show server status
    Status,

    /// List terminals
    Terminals,

    /// Launch a session for a user
    Launch {
        /// User to launch the session for
        user: String,

        /// Session scope id
        #[arg(long, default_value = "")]
        id: String,

        /// Project path
        #[arg(long, default_value = "")]
        project: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();
    config.validate()?;

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.server.log_level.clone()
    };
    // Held until exit so buffered log lines are flushed.
    let _guard = init_tracing(&log_level, config.server.log_dir.as_deref());

    let socket_path = config
        .server
        .rpc_socket
        .clone()
        .unwrap_or_else(get_socket_path);

    match cli.command {
        Commands::Start => {
            if let Some(pid) = read_running_pid(&config.server.data_dir) {
                eprintln!("Error: rserver already running (PID: {})", pid);
                eprintln!();
                eprintln!("To stop it, run:");
                eprintln!("  rserver stop");
                std::process::exit(1);
            }

            tracing::info!("rserver starting...");
            let orchestrator = DaemonOrchestrator::new(config).await?;
            run_foreground(&orchestrator).await?;
        }
        Commands::Stop { force, timeout } => {
            let result = if force {
                force_stop(&config.server.data_dir, &socket_path)
            } else {
                graceful_stop(&config.server.data_dir, &socket_path, timeout).await
            };
            match result {
                Ok(()) => println!("rserver stopped"),
                Err(e) => {
                    eprintln!("Failed to stop rserver: {:#}", e);
                    if !force {
                        eprintln!("Try: rserver stop --force");
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => match call(&socket_path, "server_status", vec![]).await {
            Ok(status) => print_status(&status),
            Err(e) => {
                println!("rserver Status: stopped");
                tracing::debug!("Status query failed: {:#}", e);
            }
        },
        Commands::Terminals => {
            let captions = call(&socket_path, "terminal_list", vec![]).await?;
            let captions: Vec<String> =
                serde_json::from_value(captions).context("Unexpected terminal list")?;
            if captions.is_empty() {
                println!("No terminals");
                return Ok(());
            }
            println!(
                "{:<20} {:<34} {:<8} {:<6} {}",
                "CAPTION", "HANDLE", "RUNNING", "BUSY", "SHELL"
            );
            for caption in captions {
                let ctx = call(&socket_path, "terminal_context", vec![json!(caption)]).await?;
                println!(
                    "{:<20} {:<34} {:<8} {:<6} {}",
                    truncate_str(&caption, 20),
                    ctx["handle"].as_str().unwrap_or_default(),
                    ctx["running"].as_bool().unwrap_or_default(),
                    ctx["busy"].as_bool().unwrap_or_default(),
                    ctx["shell"].as_str().unwrap_or_default(),
                );
            }
        }
        Commands::Launch { user, id, project } => {
            let result = call(
                &socket_path,
                "launch_session",
                vec![json!(user), json!({ "project": project, "id": id })],
            )
            .await?;
            if result["launched"].as_bool().unwrap_or_default() {
                println!("Session launched for {}", user);
            } else {
                println!("A launch for {} is already in progress", user);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Initializes stdout logging, plus a daily rolling file under `log_dir`.
fn init_tracing(
    level: &str,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stdout_layer = tracing_subscriber::fmt::layer();

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return None;
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "Failed to create log directory {:?}: {}. Logging to file disabled.",
            log_dir, e
        );
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "rserver.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

/// Calls `method` on the running server.
async fn call(socket_path: &Path, method: &str, params: Vec<Value>) -> anyhow::Result<Value> {
    let mut client = RpcClient::connect_with_timeout(socket_path, Duration::from_secs(5))
        .await
        .with_context(|| format!("Cannot connect to rserver at {}", socket_path.display()))?;
    client
        .call(method, params)
        .await
        .with_context(|| format!("{} failed", method))
}

fn print_status(status: &Value) {
    println!("rserver Status: running");
    println!(
        "  Version:           {}",
        status["version"].as_str().unwrap_or_default()
    );
    println!(
        "  Uptime:            {}",
        format_duration(status["uptime_secs"].as_u64().unwrap_or_default())
    );
    println!(
        "  Console processes: {}",
        status["console_processes"].as_u64().unwrap_or_default()
    );
    println!(
        "  Terminals:         {}",
        status["terminals"].as_u64().unwrap_or_default()
    );
    println!(
        "  Pending launches:  {}",
        status["pending_launches"].as_u64().unwrap_or_default()
    );
    println!(
        "  Sessions launched: {}",
        status["launch_count"].as_u64().unwrap_or_default()
    );
    match status["websocket"].as_str() {
        Some(addr) => println!("  Websocket:         {}", addr),
        None => println!("  Websocket:         disabled"),
    }
}

/// Sends SIGTERM and waits for the RPC socket to disappear.
async fn graceful_stop(data_dir: &Path, socket_path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = read_running_pid(data_dir).context("rserver is not running")?;
    let raw = i32::try_from(pid).context("PID out of range")?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .with_context(|| format!("Failed to signal rserver (PID {})", pid))?;
    println!("Sent SIGTERM to rserver (PID {}), waiting for exit...", pid);

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout {
        if !socket_path.exists() || read_running_pid(data_dir).is_none() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("Timeout waiting for rserver to exit ({}s)", timeout_secs)
}

/// Sends SIGKILL and removes the PID file and socket.
fn force_stop(data_dir: &Path, socket_path: &Path) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = read_running_pid(data_dir).context("rserver is not running")?;
    let raw = i32::try_from(pid).context("PID out of range")?;
    kill(Pid::from_raw(raw), Signal::SIGKILL)
        .with_context(|| format!("Failed to kill rserver (PID {})", pid))?;
    println!("Sent SIGKILL to rserver (PID {})", pid);

    remove_pid_file(data_dir);
    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Runs the server until SIGTERM or SIGINT.
async fn run_foreground(orchestrator: &DaemonOrchestrator) -> anyhow::Result<()> {
    orchestrator.start().await?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::TerminalsRestored { count } => {
                    tracing::info!(count, "Terminals restored");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    wait_for_shutdown_signal().await?;

    orchestrator.stop().await?;
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}
