//! # evsim
//!
//! Interactive OCPP charge point simulator. Loads a YAML configuration,
//! builds a [`Charger`] and drives it from a stdin read-eval loop until
//! SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use evsim_charger::{Charger, ChargerError, Config};
use evsim_ocpp::ConnectorStatus;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evsim")]
#[command(about = "OCPP charge point simulator", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Connect,
    Disconnect,
    Plugin,
    Unplug,
    Start { id_tag: String },
    Stop { reason: String },
    Status { value: Option<String> },
    Plate { value: String },
    Meter,
    Soc { percent: f64 },
    Current { amps: Option<f64> },
    Info,
    Quit,
}

/// Parse one input line. `Ok(None)` for blank lines; `Err` carries the
/// usage hint to print.
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();

    let command = match cmd.to_lowercase().as_str() {
        "help" => Command::Help,
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "plugin" => Command::Plugin,
        "unplug" => Command::Unplug,
        "start" => match arg {
            Some(id_tag) => Command::Start {
                id_tag: id_tag.to_owned(),
            },
            None => return Err("Usage: start <idTag>".into()),
        },
        "stop" => Command::Stop {
            reason: arg.unwrap_or("Local").to_owned(),
        },
        "status" => Command::Status {
            value: arg.map(str::to_owned),
        },
        "plate" => match arg {
            Some(value) => Command::Plate {
                value: value.to_owned(),
            },
            None => return Err("Usage: plate <license_plate>".into()),
        },
        "meter" => Command::Meter,
        "soc" => match arg {
            Some(raw) => match raw.parse::<f64>() {
                Ok(percent) => Command::Soc { percent },
                Err(_) => return Err(format!("invalid SOC value: {raw}")),
            },
            None => return Err("Usage: soc <0-100>".into()),
        },
        "current" => match arg {
            Some(raw) => match raw.parse::<f64>() {
                Ok(amps) => Command::Current { amps: Some(amps) },
                Err(_) => return Err(format!("invalid current value: {raw}")),
            },
            None => Command::Current { amps: None },
        },
        "info" => Command::Info,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(format!(
                "Unknown command: {other}. Type 'help' for available commands."
            ))
        }
    };
    Ok(Some(command))
}

fn print_help(config: &Config) {
    println!("Available commands:");
    println!("  help              - Show this help message");
    println!("  connect           - Connect to the OCPP server");
    println!("  disconnect        - Disconnect from the server");
    println!("  plugin            - Simulate car plug in");
    println!("  unplug            - Simulate car unplug");
    println!("  start <idTag>     - Start a transaction");
    println!("  stop [reason]     - Stop the current transaction (default reason: Local)");
    println!("  status <status>   - Set the connector status (type 'status' for valid values)");
    println!("  plate <plate>     - Send a license plate via DataTransfer");
    println!("  meter             - Send MeterValues");
    println!("  soc <0-100>       - Set the battery State of Charge");
    println!(
        "  current <amps>    - Set the charging current ({:.1}-{:.1} A)",
        config.min_current, config.max_current
    );
    println!("  info              - Show the current charger state");
    println!("  quit/exit         - Exit the simulator (use Ctrl+C)");
    println!();
    print_status_domain(config);
}

fn print_status_domain(config: &Config) {
    let values: Vec<&str> = ConnectorStatus::domain(config.version())
        .iter()
        .map(|s| s.as_str())
        .collect();
    println!(
        "Valid statuses (OCPP {}): {}",
        config.version(),
        values.join(", ")
    );
}

async fn run_command(charger: &Charger, command: Command) {
    match command {
        Command::Help => print_help(charger.config()),

        Command::Connect => {
            if charger.is_connected() {
                println!("Already connected");
                return;
            }
            match charger.connect().await {
                Ok(()) => println!("Connected to server"),
                Err(e) => println!("Error: {e}"),
            }
        }

        Command::Disconnect => {
            if !charger.is_connected() {
                println!("Not connected");
                return;
            }
            charger.disconnect().await;
            println!("Disconnected from server");
        }

        Command::Plugin => match charger.plugin().await {
            Ok(()) => println!("Car plugged in ({})", charger.status()),
            Err(e) => println!("Error: {e}"),
        },

        Command::Unplug => match charger.unplug().await {
            Ok(()) => println!("Car unplugged (Available)"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Start { id_tag } => match charger.start_transaction(&id_tag).await {
            Ok(()) => println!("Transaction started"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Stop { reason } => match charger.stop_transaction(&reason).await {
            Ok(()) => println!("Transaction stopped"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Status { value: None } => {
            println!("Usage: status <status>");
            print_status_domain(charger.config());
        }

        Command::Status { value: Some(raw) } => match raw.parse::<ConnectorStatus>() {
            Ok(status) => match charger.set_status(status).await {
                Ok(()) => println!("Status updated to: {status}"),
                Err(e) => println!("Error: {e}"),
            },
            Err(_) => {
                println!(
                    "Error: {}",
                    ChargerError::InvalidStatus {
                        status: raw,
                        version: charger.config().version(),
                    }
                );
                print_status_domain(charger.config());
            }
        },

        Command::Plate { value } => match charger.set_license_plate(&value).await {
            Ok(()) => println!("License plate set: {value}"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Meter => match charger.meter_values().await {
            Ok(()) => println!("MeterValues updated"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Soc { percent } => match charger.set_soc(percent) {
            Ok(()) => println!("SOC set to: {percent:.1}%"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Current { amps: None } => {
            let config = charger.config();
            println!(
                "Usage: current <amperes> (min: {:.1} A, max: {:.1} A)",
                config.min_current, config.max_current
            );
            println!("Current: {:.1} A", charger.current());
        }

        Command::Current { amps: Some(amps) } => match charger.set_current(amps).await {
            Ok(()) => println!("Current set to: {amps:.1} A"),
            Err(e) => println!("Error: {e}"),
        },

        Command::Info => {
            let snapshot = charger.snapshot();
            println!("Connected: {}", snapshot.connected);
            println!("Status: {}", snapshot.status);
            println!("Charging: {}", snapshot.charging);
            println!("Voltage: {:.1} V", snapshot.voltage);
            println!("Current: {:.1} A", snapshot.current);
            println!("Power: {:.1} W", snapshot.power);
            println!("SOC: {:.1}%", snapshot.soc);
            println!("Meter: {} Wh", snapshot.meter_value);
            if let Some(transaction_id) = &snapshot.transaction_id {
                println!("Transaction: {transaction_id}");
            }
            if let Some(plate) = &snapshot.license_plate {
                println!("License Plate: {plate}");
            }
        }

        Command::Quit => println!("Use Ctrl+C to exit"),
    }
}

fn print_prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    info!("OCPP charge point simulator");
    info!(charger_id = %config.charger_id, version = %config.version(), url = %config.server_url, "configured");
    info!(
        voltage = config.voltage,
        max_current = config.max_current,
        max_power = config.max_power,
        initial_status = %config.initial_status,
        initial_soc = config.initial_soc,
        battery_capacity = config.battery_capacity,
        "electrical envelope"
    );

    let charger = Charger::new(config)?;

    println!("Charger simulator ready. Type 'connect' to connect to the server, 'help' for commands.");
    print_prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match parse_command(&line) {
                            Ok(Some(command)) => run_command(&charger, command).await,
                            Ok(None) => {}
                            Err(hint) => println!("{hint}"),
                        }
                        print_prompt();
                    }
                    // stdin closed: keep running until a signal arrives
                    Ok(None) => {
                        shutdown_signal().await;
                        break;
                    }
                    Err(_) => {}
                }
            }
        }
    }

    info!("shutting down");
    charger.disconnect().await;
    Ok(())
}
