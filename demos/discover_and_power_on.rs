//! Discover all LIFX lights on the network and turn them on.
//!
//! This example demonstrates:
//! - Background discovery of LIFX bulbs on the local network
//! - Reacting to `device_discovered` events
//! - Turning on every discovered light and reporting partial failures
//!
//! Run with: cargo run --example discover_and_power_on

use std::time::Duration;

use futures::StreamExt;
use lifx_lights_rs::{Client, Config, Target};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Discovering LIFX lights on the network...");

    let mut client = Client::bind(Config::default()).await?;
    let mut events = client.subscribe();
    client.start()?;

    // Collect events for 5 seconds
    let listen = async {
        while let Some(event) = events.next().await {
            println!("  [{}] {} at {}", event.kind, event.id(), event.addr());
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), listen).await;

    let devices = client.active_devices();
    if devices.is_empty() {
        println!("No lights found on the network.");
        client.shutdown().await;
        return Ok(());
    }

    println!("\nFound {} light(s):", devices.len());
    for device in &devices {
        println!(
            "  - {} at {} ({})",
            device.id(),
            device.addr(),
            device.label().unwrap_or("unnamed")
        );
    }

    println!("\nTurning all lights on...");
    let report = client.power_on(Target::Broadcast).await?;
    for outcome in &report.outcomes {
        if outcome.delivery.is_success() {
            println!("  ✓ {} turned on", outcome.id);
        } else {
            eprintln!("  ✗ {} failed: {:?}", outcome.id, outcome.delivery);
        }
    }

    client.shutdown().await;
    println!("\nDone!");
    Ok(())
}
