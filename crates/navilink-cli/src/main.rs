//! Command-line controller for NaviLink water heaters.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use navilink_core::{
    Command as DeviceCommand, DeviceSession, OperationMode, ReservationProgram, Response,
    SessionEvent,
};
use navilink_mqtt::MqttTransport;
use tokio::sync::broadcast::error::RecvError;

use crate::config::{CliConfig, env_vars};

/// NaviLink - Control water heaters over MQTT.
#[derive(Parser, Debug)]
#[command(name = "navilink")]
#[command(author, version, about = "NaviLink - Control water heaters over MQTT", long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file.
    #[arg(short, long, global = true, default_value = "navilink.json")]
    config: PathBuf,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current state of a channel.
    Status {
        #[arg(long, default_value_t = 1)]
        channel: u8,
    },
    /// Stream state changes and device events as JSON lines.
    Watch {
        /// Seconds between status refreshes.
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Switch the heater on or off.
    Power {
        #[arg(value_enum)]
        state: Switch,
        #[arg(long, default_value_t = 1)]
        channel: u8,
    },
    /// Set the hot water set-point in the channel's unit.
    Temperature {
        value: f64,
        #[arg(long, default_value_t = 1)]
        channel: u8,
    },
    /// Set the operation mode (heat-pump, electric, energy-saver, ...).
    Mode { mode: String },
    /// Start a vacation.
    Vacation {
        #[arg(default_value_t = 7)]
        days: u32,
    },
    /// Show or replace the weekly reservation program.
    Reservations {
        #[command(subcommand)]
        action: ReservationCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ReservationCommand {
    /// Print the program stored on the device.
    Show,
    /// Upload a program from a JSON file.
    Set {
        #[arg(required = true)]
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // Validate arguments before touching the network.
    let command = match &args.command {
        Command::Status { .. } | Command::Watch { .. } => None,
        Command::Power { state, channel } => Some(DeviceCommand::SetPower {
            channel: *channel,
            on: matches!(state, Switch::On),
        }),
        Command::Temperature { value, channel } => Some(DeviceCommand::SetTemperature {
            channel: *channel,
            value: *value,
        }),
        Command::Mode { mode } => {
            let mode = OperationMode::parse(mode)
                .ok_or_else(|| anyhow::anyhow!("Unknown operation mode '{mode}'"))?;
            Some(DeviceCommand::SetOperationMode {
                mode,
                vacation_days: None,
            })
        }
        Command::Vacation { days } => Some(DeviceCommand::SetOperationMode {
            mode: OperationMode::Vacation,
            vacation_days: Some(*days),
        }),
        Command::Reservations {
            action: ReservationCommand::Show,
        } => Some(DeviceCommand::ReadReservations),
        Command::Reservations {
            action: ReservationCommand::Set { path },
        } => Some(DeviceCommand::WriteReservations {
            program: read_program(path)?,
        }),
    };

    let config = CliConfig::load(&args.config)?;
    let session = connect(&config).await?;
    session
        .request_info()
        .await
        .context("Device did not answer the info request")?;

    let result = match (args.command, command) {
        (Command::Status { channel }, _) => {
            let response = session.refresh_status(channel).await?;
            print_states(&response)
        }
        (Command::Watch { interval }, _) => watch(&session, Duration::from_secs(interval.max(1))).await,
        (_, Some(command)) => {
            let response = session.execute(command).await?;
            print_states(&response)
        }
        (_, None) => Ok(()),
    };

    session.close().await;
    result
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "navilink={level},navilink_core={level},navilink_mqtt={level}"
        ))
        .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn connect(config: &CliConfig) -> Result<DeviceSession> {
    let identity = config.identity();
    let context = config.session_context();
    let will = DeviceSession::last_will(&identity, &context)?;
    let transport = Arc::new(MqttTransport::connect_with_inbound(
        &config.mqtt,
        Some(&will),
        config.session.inbound_capacity,
    ));

    let session = DeviceSession::start(identity, context, transport, config.session.clone())
        .await
        .context("Failed to start device session")?;
    Ok(session)
}

fn read_program(path: &PathBuf) -> Result<ReservationProgram> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read reservation file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse reservation file {}", path.display()))
}

fn print_states(response: &Response) -> Result<()> {
    for state in &response.states {
        println!("{}", serde_json::to_string_pretty(state.as_ref())?);
    }
    Ok(())
}

async fn watch(session: &DeviceSession, interval: Duration) -> Result<()> {
    let mut events = session.subscribe_events();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = ticker.tick() => {
                for channel in session.channels() {
                    if let Err(e) = session.refresh_status(channel).await {
                        tracing::warn!(channel, error = %e, "Status refresh failed");
                    }
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::State(state)) => println!("{}", serde_json::to_string(state.as_ref())?),
                Ok(SessionEvent::Device(event)) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "Event stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
