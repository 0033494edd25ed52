// btprint: desktop CLI for serial-profile receipt printers
//
// Drives btprint-core against configured printers reached through bound
// device nodes or raw TCP ports.

mod backend;
mod config;
mod serve;

use anyhow::{Context, Result};
use btprint_core::{
    BluetoothState, DeviceType, Event, PrinterManager, TransferState,
};
use clap::{Parser, Subcommand};
use colored::*;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "btprint")]
#[command(about = "btprint: paced raw printing to serial-profile printers", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show adapter state
    State,
    /// List configured printers
    Devices,
    /// Listen for discovery events
    Scan {
        #[arg(short, long, default_value = "5")]
        secs: u64,
    },
    /// Check that a printer accepts a connection
    Connect { address: String },
    /// Send a file (or `-` for stdin) to a printer
    Print {
        address: String,
        file: String,
        /// Keep the channel open after the transfer
        #[arg(short, long)]
        keep: bool,
        /// Largest single write in bytes
        #[arg(short, long)]
        chunk: Option<usize>,
    },
    /// Answer JSON-lines method calls on stdin
    Serve,
    /// Manage configured printers
    Printer {
        #[command(subcommand)]
        action: PrinterAction,
    },
    /// Configure manager settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum PrinterAction {
    Add {
        address: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Device node, e.g. /dev/rfcomm0
        #[arg(short, long)]
        device: Option<PathBuf>,
    },
    Remove {
        address: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Devices => cmd_devices(&config),
        Commands::Printer { action } => cmd_printer(&mut config, action),
        Commands::Config { action } => cmd_config(&mut config, action),
        command => {
            let manager = PrinterManager::start(config.manager.clone(), backend::platform(&config))
                .context("Failed to start printer manager")?;
            let outcome = match command {
                Commands::State => cmd_state(&manager),
                Commands::Scan { secs } => cmd_scan(&manager, secs).await,
                Commands::Connect { address } => cmd_connect(&manager, &address).await,
                Commands::Print {
                    address,
                    file,
                    keep,
                    chunk,
                } => cmd_print(&manager, &address, &file, keep, chunk).await,
                Commands::Serve => {
                    let input = tokio::io::BufReader::new(tokio::io::stdin());
                    serve::serve(&manager, input, tokio::io::stdout()).await
                }
                Commands::Devices | Commands::Printer { .. } | Commands::Config { .. } => Ok(()),
            };
            manager.shutdown().await;
            outcome
        }
    }
}

fn cmd_state(manager: &PrinterManager) -> Result<()> {
    let state = manager.get_state();
    let label = match state {
        BluetoothState::On => "on".green(),
        BluetoothState::Off => "off".yellow(),
        BluetoothState::Unavailable => "unavailable".red(),
    };
    println!("{} {} ({})", "Bluetooth:".bold(), label, state.code());
    Ok(())
}

fn kind_label(kind: DeviceType) -> &'static str {
    match kind {
        DeviceType::Unknown => "unknown",
        DeviceType::Classic => "classic",
        DeviceType::Le => "le",
        DeviceType::Dual => "dual",
    }
}

fn cmd_devices(config: &config::Config) -> Result<()> {
    if config.printers.is_empty() {
        println!("{}", "No printers configured.".dimmed());
        println!(
            "  Add one: {}",
            "btprint printer add <address> --name <name> [--device /dev/rfcomm0]".bright_green()
        );
        return Ok(());
    }

    println!("{}", "Printers".bold());
    for printer in &config.printers {
        let route = match &printer.device {
            Some(path) => path.display().to_string(),
            None => "tcp".to_string(),
        };
        println!(
            "  {} {} [{}] via {}",
            printer.address.bright_cyan(),
            printer.to_device().display_name(),
            kind_label(printer.kind),
            route.dimmed()
        );
    }
    Ok(())
}

async fn cmd_scan(manager: &PrinterManager, secs: u64) -> Result<()> {
    let mut subscription = manager.subscribe()?;
    println!("{} ({}s)", "Scanning...".bold(), secs);

    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = subscription.next() => match event {
                Some(Event::DeviceFound(device)) => println!(
                    "  {} {} {} [{}]",
                    "✓".green(),
                    device.address.bright_cyan(),
                    device.display_name(),
                    kind_label(device.kind)
                ),
                Some(Event::RadioDisabled) => println!("  {}", "Bluetooth is off".yellow()),
                Some(Event::PermissionDenied) => {
                    println!("  {}", "Bluetooth permission denied".red())
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    Ok(())
}

async fn cmd_connect(manager: &PrinterManager, address: &str) -> Result<()> {
    manager
        .connect(address)
        .await
        .with_context(|| format!("Failed to connect to {}", address))?;
    println!("  {} Connected to {}", "✓".green(), address.bright_cyan());
    manager.disconnect(address).await?;
    Ok(())
}

async fn read_payload(file: &str) -> Result<Vec<u8>> {
    if file == "-" {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read stdin")?;
        Ok(data)
    } else {
        tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file))
    }
}

fn render_transfer(event: &Event) {
    match event {
        Event::StateChanged { state, .. } => {
            let label = match state {
                TransferState::Connecting => "connecting".yellow(),
                TransferState::Transmitting => "transmitting".cyan(),
                TransferState::Completed => "completed".green(),
                TransferState::Failed => "failed".red(),
                TransferState::Idle => "idle".dimmed(),
            };
            println!("\r  {} {}", "state:".dimmed(), label);
        }
        Event::Progress { sample, .. } => {
            print!("\r  {} {}/{} bytes", "sent:".dimmed(), sample.sent, sample.total);
            let _ = std::io::stdout().flush();
            if sample.is_complete() {
                println!();
            }
        }
        _ => {}
    }
}

async fn cmd_print(
    manager: &PrinterManager,
    address: &str,
    file: &str,
    keep: bool,
    chunk: Option<usize>,
) -> Result<()> {
    let data = read_payload(file).await?;
    let total = data.len();
    println!(
        "{} {} bytes to {}",
        "Printing".bold(),
        total,
        address.bright_cyan()
    );

    let mut subscription = manager.subscribe()?;
    let write = manager.write(address, data, keep, chunk);
    tokio::pin!(write);

    let outcome = loop {
        tokio::select! {
            outcome = &mut write => break outcome,
            Some(event) = subscription.next() => {
                if event.address() == Some(address) {
                    render_transfer(&event);
                }
            }
        }
    };
    while let Some(event) = subscription.try_recv() {
        if event.address() == Some(address) {
            render_transfer(&event);
        }
    }

    outcome.with_context(|| format!("Failed to print to {}", address))?;
    println!("  {} Sent {} bytes", "✓".green(), total);
    if keep {
        println!(
            "  {}",
            "Channel kept open until this process exits".dimmed()
        );
    }
    Ok(())
}

fn cmd_printer(config: &mut config::Config, action: PrinterAction) -> Result<()> {
    match action {
        PrinterAction::Add {
            address,
            name,
            device,
        } => {
            config.add_printer(config::PrinterEntry {
                address: address.clone(),
                name,
                kind: DeviceType::Classic,
                device,
            })?;
            println!("  {} Added {}", "✓".green(), address.bright_cyan());
        }
        PrinterAction::Remove { address } => {
            if config.remove_printer(&address)? {
                println!("  {} Removed {}", "✓".green(), address.bright_cyan());
            } else {
                println!("  {} Unknown printer {}", "✗".red(), address);
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &mut config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("  {} {} = {}", "✓".green(), key, value.bright_cyan());
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<28} {}", key, value.bright_cyan());
            }
        }
    }
    Ok(())
}
