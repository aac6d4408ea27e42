//! Deckard daemon - UI runner orchestrator
//!
//! This binary runs as a background daemon, accepting front-end requests
//! over a Unix socket, starting rendering workers and compiling their
//! translation catalogs.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! deckardd start
//!
//! # Start the daemon with an explicit config file
//! deckardd --config /etc/deckard/deckard.toml start -d
//!
//! # Stop the daemon
//! deckardd stop
//!
//! # Check daemon status
//! deckardd status
//! ```

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deckard_core::DeckardConfig;
use deckardd::locale::probe_locales;
use deckardd::registry::spawn_registry;
use deckardd::server::DaemonServer;

/// Environment variable naming the config file
const CONFIG_ENV: &str = "DECKARD_CONFIG";

/// Environment variable overriding the socket path
const SOCKET_ENV: &str = "DECKARD_SOCKET";

/// Deckard daemon - UI runner orchestrator
#[derive(Parser, Debug)]
#[command(name = "deckardd", version, about)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("deckard")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("deckardd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("deckardd.log")
}

/// Resolves the configuration: `--config`, then `$DECKARD_CONFIG`, then the
/// per-user default file if present, then built-in defaults.
fn load_config(explicit: Option<PathBuf>) -> Result<DeckardConfig> {
    let path = explicit
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| DeckardConfig::default_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => DeckardConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DeckardConfig::default(),
    };

    if let Some(socket) = env::var_os(SOCKET_ENV) {
        config.socket_path = PathBuf::from(socket);
    }

    Ok(config)
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        bail!("Invalid PID {pid}");
    };
    // SAFETY: kill(2) takes plain integers and has no memory effects.
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            // Fail on a bad config before forking
            let config = load_config(args.config)?;
            config.validate().context("Invalid configuration")?;

            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'deckardd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            if let Ok(config) = load_config(args.config) {
                if config.socket_path.exists() {
                    println!("Socket: {}", config.socket_path.display());
                }
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    // Keep the working directory so relative content paths still resolve
    let cwd = env::current_dir().context("Failed to read working directory")?;

    Daemonize::new()
        .working_directory(cwd)
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: DeckardConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("deckardd=info".parse()?)
                .add_directive("deckard_core=info".parse()?)
                .add_directive("deckard_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Deckard daemon starting"
    );

    if !config.content_root.is_dir() {
        warn!(
            content_root = %config.content_root.display(),
            "Content root does not exist, list_content will fail"
        );
    }

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let locales = Arc::new(probe_locales().await);

    let registry =
        spawn_registry(&config, locales).context("Failed to start session registry")?;
    info!(
        max_users = config.limits.max_users,
        first_port = config.limits.first_port,
        "Session registry started"
    );

    let server = DaemonServer::new(
        &config.socket_path,
        registry.clone(),
        &config.content_root,
        cancel_token,
    );

    info!(socket = %config.socket_path.display(), "Starting server");

    let result = server.run().await;

    // Workers and catalog storage must not outlive the daemon
    registry.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Deckard daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
