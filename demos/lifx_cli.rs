//! CLI application for controlling LIFX lights.
//!
//! This example maps the library's named actions (`discover`, `power-on`,
//! `power-off`, `set-color`) onto subcommands.
//!
//! Run with: cargo run --example lifx_cli -- --help

use std::time::Duration;

use clap::{Parser, Subcommand};
use lifx_lights_rs::{Action, Client, ColorParams, Config, DeviceId, DispatchReport, Target};

#[derive(Parser)]
#[command(name = "lifx-cli")]
#[command(about = "Control LIFX smart lights from the command line", long_about = None)]
struct Cli {
    /// Device to address, e.g. d0:73:d5:01:02:03 (all active lights when omitted)
    #[arg(short, long, global = true)]
    device: Option<DeviceId>,

    /// How long to listen for lights before acting, in seconds
    #[arg(short, long, global = true, default_value = "3")]
    wait: u64,

    /// Wait for each light to acknowledge the command
    #[arg(long, global = true)]
    ack: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover all LIFX lights on the network
    Discover,

    /// Turn lights on
    On,

    /// Turn lights off
    Off,

    /// Set color (each component 0-65535)
    Color {
        /// Hue, 0-65535 maps to 0-360 degrees
        hue: u32,
        /// Saturation, 0 is white
        saturation: u32,
        /// Brightness, 0 is dark
        brightness: u32,
        /// Transition time in milliseconds
        #[arg(short, long, default_value = "0")]
        transition: u32,
    },

    /// Show client diagnostics after discovery
    Diagnostics,
}

fn print_report(report: &DispatchReport) {
    for outcome in &report.outcomes {
        let status = if outcome.delivery.is_success() { "ok" } else { "FAILED" };
        println!("  {:17}  {:21}  {:6}  {:?}", outcome.id, outcome.addr, status, outcome.delivery);
    }
    println!(
        "{} succeeded, {} failed",
        report.succeeded().count(),
        report.failed().count()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config {
        ack_required: cli.ack,
        ..Config::default()
    };
    let mut client = Client::bind(config).await?;
    client.start()?;

    println!("Listening for lights ({}s)...", cli.wait);
    tokio::time::sleep(Duration::from_secs(cli.wait)).await;

    let target = cli.device.map_or(Target::Broadcast, Target::Single);
    let (action, params) = match cli.command {
        Commands::Discover => (Action::Discover, ColorParams::default()),
        Commands::On => (Action::PowerOn, ColorParams::default()),
        Commands::Off => (Action::PowerOff, ColorParams::default()),
        Commands::Color {
            hue,
            saturation,
            brightness,
            transition,
        } => (
            Action::SetColor,
            ColorParams {
                hue,
                saturation,
                brightness,
                duration_ms: transition,
            },
        ),
        Commands::Diagnostics => {
            let diagnostics = client.diagnostics();
            println!("\nDiagnostics:\n{}", serde_json::to_string_pretty(&diagnostics)?);
            client.shutdown().await;
            return Ok(());
        }
    };

    match action {
        Action::Discover => {
            let devices = client.devices();
            if devices.is_empty() {
                println!("No lights found on the network.");
            } else {
                println!("\nFound {} light(s):", devices.len());
                for device in devices {
                    println!(
                        "  {}  {:21}  power: {:4}  label: {}",
                        device.id(),
                        device.addr(),
                        device.power().map_or("?".to_string(), |p| p.to_string()),
                        device.label().unwrap_or("-")
                    );
                }
            }
        }
        _ => {
            println!("Running {}...", action);
            match client.perform(action, target, params).await {
                Ok(report) if report.is_empty() => println!("No active lights to control."),
                Ok(report) => print_report(&report),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
