use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pcd_core::{
    DeviceRegistry, NusbConnector, NusbTransport, PcdError, ReplyBuffer, Session, SessionConfig,
    check_connected,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "PCD400 USB command tool", long_about = None)]
struct Args {
    /// Path to a TOML session config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transfer timeout in seconds (1-60)
    #[arg(short, long)]
    timeout: Option<u32>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether the device is connected
    Check,
    /// Send a command, given as hex bytes
    Send { hex: String },
    /// Receive a reply of exactly COUNT bytes
    Receive { count: usize },
    /// Send a command, then receive a reply of exactly COUNT bytes
    Exchange { hex: String, count: usize },
    /// Reset the target device
    Reset,
    /// Write a default config file
    InitConfig { path: PathBuf },
}

/// Parse bytes written as hex, with optional whitespace or `0x` prefixes.
fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .split_whitespace()
        .map(|word| word.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid hex digits in {text:?}");
    }
    if digits.is_empty() || digits.len() % 2 != 0 {
        bail!("expected an even, non-zero number of hex digits in {text:?}");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(anyhow::Error::from))
        .collect()
}

fn format_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

/// Apply `--timeout`; only commands that open a session use it.
fn session_config(args: &Args, mut config: SessionConfig) -> Result<SessionConfig> {
    if let Some(secs) = args.timeout {
        config.default_timeout_secs = secs;
        config.validate()?;
    }
    Ok(config)
}

fn receive(session: &Session<NusbTransport>, count: usize) -> Result<Vec<u8>> {
    let mut storage = vec![0u8; count];
    let mut reply = ReplyBuffer::new(&mut storage, count)?;
    session.receive_command(&mut reply)?;
    Ok(reply.filled().to_vec())
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    let session = match &args.command {
        Command::InitConfig { path } => {
            SessionConfig::default().save_to_file(path)?;
            info!(path = %path.display(), "Wrote default config");
            return Ok(());
        }
        Command::Check => {
            let status = check_connected(&NusbConnector::from_config(&config))?;
            println!("{status}");
            return Ok(());
        }
        _ => {
            let config = session_config(args, config)?;
            let registry = Arc::new(DeviceRegistry::with_lock_file(config.lock_file_path()));
            Session::open_configured(&registry, &config)?
        }
    };

    let outcome = match &args.command {
        Command::Send { hex } => {
            parse_hex(hex).and_then(|cmd| session.send(&cmd).map_err(Into::into))
        }
        Command::Receive { count } => receive(&session, *count).map(|reply| {
            println!("{}", format_hex(&reply));
        }),
        Command::Exchange { hex, count } => parse_hex(hex).and_then(|cmd| {
            session.send(&cmd)?;
            let reply = receive(&session, *count)?;
            println!("{}", format_hex(&reply));
            Ok(())
        }),
        Command::Reset => session.target_reset().map_err(Into::into),
        Command::Check | Command::InitConfig { .. } => Ok(()),
    };

    // Always release the device, but report the first failure.
    let closed = session.close();
    outcome?;
    closed?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        match e.downcast_ref::<PcdError>() {
            Some(pcd) => error!(code = pcd.code(), "Error: {}", pcd),
            None => error!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}
