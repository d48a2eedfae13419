//! thermbind Daemon (thermbindd)
//!
//! Hosts the thermal topology service on a Unix domain socket. Platform
//! clients open a session with PROFILE_START and then describe zones, sensors
//! and cooling devices one call at a time.
//!
//! # Hardening
//! - Restrictive umask (0077), working directory set to /
//! - Symlink refusal on socket creation
//! - Connection, parcel size and timeout limits
//! - Graceful shutdown on SIGINT/SIGTERM with socket cleanup

mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use tb_core::constants::paths;
use tb_core::{
    get_config_path, load_config_from, DaemonConfig, JsonZoneLoader, Session, ThermalApiService,
    ZoneLoader,
};

use crate::server::ServerLimits;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Security Hardening
// ============================================================================

fn set_secure_umask() {
    // SAFETY: umask only swaps the process file creation mask.
    unsafe { libc::umask(0o077) };
    debug!("Umask set to 0077");
}

fn secure_working_directory() {
    if std::env::set_current_dir("/").is_err() {
        warn!("Could not chdir to /");
    }
}

/// Absolute, no traversal, no NUL, not a symlink
fn validate_socket_path(path: &str) -> Result<(), String> {
    let p = Path::new(path);

    if !p.is_absolute() {
        return Err("Socket path must be absolute".into());
    }
    if path.contains("..") {
        return Err("Socket path contains path traversal".into());
    }
    if path.contains('\0') {
        return Err("Socket path contains null byte".into());
    }
    if let Some(parent) = p.parent() {
        if !parent.exists() {
            return Err(format!("Parent directory does not exist: {:?}", parent));
        }
    }
    if p.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        return Err("Socket path is a symlink - refusing for security".into());
    }
    Ok(())
}

// ============================================================================
// CLI
// ============================================================================

struct CliArgs {
    socket_path: Option<String>,
    config_path: Option<PathBuf>,
}

enum CliAction {
    Run(CliArgs),
    Exit,
}

fn print_help() {
    eprintln!("thermbindd {} - thermal topology IPC daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    thermbindd [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -f, --foreground    Run in foreground (always on)");
    eprintln!("    -s, --socket PATH   Socket path (default {})", paths::DEFAULT_SOCKET_PATH);
    eprintln!("    -c, --config PATH   Config file (default {}/{})", paths::CONFIG_DIR, paths::CONFIG_FILE);
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    {}       Log filter (trace, debug, info, warn, error)", paths::LOG_ENV);
    eprintln!("    {}    Config file path", paths::CONFIG_ENV);
}

fn parse_args(args: &[String]) -> anyhow::Result<CliAction> {
    let mut cli = CliArgs { socket_path: None, config_path: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(CliAction::Exit);
            }
            "-v" | "--version" => {
                println!("thermbindd {}", VERSION);
                return Ok(CliAction::Exit);
            }
            "-f" | "--foreground" => {}
            "-s" | "--socket" => {
                i += 1;
                let Some(path) = args.get(i) else { bail!("--socket requires a path argument") };
                cli.socket_path = Some(path.clone());
            }
            "-c" | "--config" => {
                i += 1;
                let Some(path) = args.get(i) else { bail!("--config requires a path argument") };
                cli.config_path = Some(PathBuf::from(path));
            }
            arg => bail!("Unknown argument: {}", arg),
        }
        i += 1;
    }
    Ok(CliAction::Run(cli))
}

// ============================================================================
// Logging
// ============================================================================

/// journald when the journal socket exists, stdout otherwise
fn init_logging(filter: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, falling back to stdout", e),
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
    false
}

/// Configured store, else the default zones.json when it exists
fn select_zone_loader(config: &DaemonConfig) -> Box<dyn ZoneLoader> {
    if config.zone_store.is_some() {
        return config.zone_loader();
    }
    let default_store = Path::new(paths::CONFIG_DIR).join(paths::ZONE_STORE_FILE);
    if default_store.exists() {
        return Box::new(JsonZoneLoader::new(default_store));
    }
    config.zone_loader()
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_args(&args) {
        Ok(CliAction::Run(cli)) => cli,
        Ok(CliAction::Exit) => return Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // Resolve before chdir so relative -c paths still work
    let config_path = cli
        .config_path
        .map(|p| std::path::absolute(&p).unwrap_or(p))
        .unwrap_or_else(get_config_path);

    set_secure_umask();
    secure_working_directory();

    let mut config = load_config_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(socket_path) = cli.socket_path {
        config.socket_path = socket_path;
    }

    let log_filter = std::env::var(paths::LOG_ENV).unwrap_or_else(|_| config.log_level.clone());
    let journald = init_logging(&log_filter);

    info!("STARTUP: thermbindd {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });
    info!("STARTUP: Config: {}", config_path.display());

    if let Err(e) = validate_socket_path(&config.socket_path) {
        error!("Invalid socket path {}: {}", config.socket_path, e);
        std::process::exit(1);
    }

    let loader = select_zone_loader(&config);
    info!("STARTUP: Zone loader: {}", loader.name());
    let service = ThermalApiService::new(Session::new(config.limits, loader));

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        signal.notify_one();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let limits = ServerLimits {
        max_connections: config.max_connections,
        read_timeout: std::time::Duration::from_millis(config.read_timeout_ms),
    };

    info!("STARTUP: Socket path: {}", config.socket_path);
    info!("STARTUP: PID: {}", std::process::id());

    if let Err(e) = server::run_server(&config.socket_path, service, limits, async move {
        shutdown.notified().await
    })
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("SHUTDOWN: Daemon terminated gracefully");
    Ok(())
}
