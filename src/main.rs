//! twochat - two-user networked chat for the terminal
//!
//! One side listens on a TCP port, the other connects to it. Once connected,
//! every line typed on one side shows up in the other side's transcript.
//!
//! # Quick Start
//!
//! ```text
//! twochat --listen 1501             # wait for a peer
//! twochat --connect localhost:1501  # dial a peer
//! twochat                           # start idle, use /listen or /connect
//! ```
//!
//! # Commands
//!
//! | Command | Action |
//! |---------|--------|
//! | /listen [port] | Wait for a peer |
//! | /connect [host] [port] | Dial a peer |
//! | /disconnect | Close the connection |
//! | /save [path] | Save the transcript |
//! | /quit | Exit |
//!
//! The wire format is plain newline-delimited text, so `nc` works as a peer.

mod app;
mod config;
mod core;
mod transcript;
mod ui;

use std::env;
use std::str::FromStr;

use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::{spawn_input_reader, App};
use crate::config::Config as ChatConfig;
use crate::ui::commands::{parse_port, parse_target};
use crate::ui::{Command, Console};

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Config {
    /// Start listening right away
    listen: Option<Option<u16>>,
    /// Dial right away: host and optional port
    connect: Option<(String, Option<u16>)>,
    /// Overrides the configured log level
    log_level: Option<String>,
    /// Write a default config file and exit
    init_config: bool,
    show_help: bool,
    show_version: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("twochat {}", VERSION);
}

fn print_help() {
    eprintln!("twochat {} - Two-user networked chat", VERSION);
    eprintln!();
    eprintln!("Usage: twochat [OPTIONS]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  -l, --listen [PORT]       Listen for a peer (default port from config, 1501)");
    eprintln!("  -c, --connect HOST[:PORT] Connect to a listening peer");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  --log-level LEVEL         error, warn, info, debug or trace");
    eprintln!("  --init-config             Write ~/.twochat/config.toml with defaults");
    eprintln!("  -v, --version             Show version");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  twochat -l 15010");
    eprintln!("  twochat -c localhost:15010");
    eprintln!();
    eprintln!("Configuration: ~/.twochat/config.toml");
    eprintln!("Log file:      ~/.twochat/twochat.log");
}

fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => config.show_help = true,
            "-v" | "--version" => config.show_version = true,
            "-l" | "--listen" => {
                // Port is optional; only consume the next arg if it is not a flag
                let port = match args.get(i + 1) {
                    Some(next) if !next.starts_with('-') => {
                        i += 1;
                        Some(parse_port(next).map_err(|e| e.to_string())?)
                    }
                    _ => None,
                };
                config.listen = Some(port);
            }
            "-c" | "--connect" => {
                i += 1;
                let target = args.get(i).ok_or("Missing connect target")?;
                config.connect = Some(parse_target(target).map_err(|e| e.to_string())?);
            }
            "--log-level" => {
                i += 1;
                let level = args.get(i).ok_or("Missing log level")?;
                Level::from_str(level).map_err(|_| format!("Invalid log level: {}", level))?;
                config.log_level = Some(level.clone());
            }
            "--init-config" => config.init_config = true,
            other => return Err(format!("Unknown option: {}", other)),
        }
        i += 1;
    }

    if config.listen.is_some() && config.connect.is_some() {
        return Err("--listen and --connect cannot be used together".to_string());
    }

    Ok(config)
}

/// Send logs to `~/.twochat/twochat.log`. Failure to open it is not fatal.
fn init_logging(level: &str) {
    let log_path = ChatConfig::app_dir()
        .map(|dir| dir.join("twochat.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("twochat.log"));

    // Create log directory if needed
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let level = Level::from_str(level).unwrap_or(Level::INFO);
        // RUST_LOG wins over the configured level
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    if cli.show_help {
        print_help();
        return Ok(());
    }
    if cli.show_version {
        print_version();
        return Ok(());
    }

    let chat_config = ChatConfig::load();

    if cli.init_config {
        let path = ChatConfig::default().save()?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| chat_config.log_level.clone());
    init_logging(&level);

    info!("twochat {} starting...", VERSION);

    let mut app = App::new(chat_config, Console::stdout());
    app.handle_command(Command::Help)?;

    if let Some(port) = cli.listen {
        app.handle_command(Command::Listen { port })?;
    } else if let Some((host, port)) = cli.connect {
        app.handle_command(Command::Connect {
            host: Some(host),
            port,
        })?;
    }

    let input = spawn_input_reader(app.active_session());
    app.run(input)?;

    info!("twochat exiting");
    Ok(())
}
