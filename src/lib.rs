//! # lifx_lights_rs
//!
//! An async Rust library for discovering and controlling LIFX smart lights
//! over the LAN protocol.
//!
//! This crate provides a **runtime-agnostic** async API that keeps a live
//! registry of the bulbs on your local network and sends them power and
//! color commands, one bulb at a time or all at once.
//!
//! ## Quick Start
//!
//! ```ignore
//! use futures::StreamExt;
//! use lifx_lights_rs::{Client, Config, Target};
//!
//! // Works with any async runtime!
//! async fn control_lights() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::bind(Config::default()).await?;
//!     let mut events = client.subscribe();
//!     client.start()?;
//!
//!     // Wait for the first bulb to answer
//!     if let Some(event) = events.next().await {
//!         println!("found {} at {}", event.id(), event.addr());
//!     }
//!
//!     // Set every bulb to green over one second
//!     let report = client
//!         .set_color(Target::Broadcast, 21845, 65535, 65535, 1000)
//!         .await?;
//!     for failed in report.failed() {
//!         eprintln!("{} did not get the command", failed.id);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Runtime Agnostic**: Works with tokio, async-std, or smol async runtimes
//! - **Discovery**: Periodic broadcast discovery maintained by the [`DiscoveryEngine`]
//! - **Device Registry**: Live view of known bulbs in the [`DeviceRegistry`]
//! - **Power Control**: Turn lights on/off with [`Intent::PowerOn`] and [`Intent::PowerOff`]
//! - **Colors**: Set hue, saturation and brightness with [`Intent::SetColor`]
//! - **Partial Failures**: Per-device results in a [`DispatchReport`]
//! - **Events**: Subscribe to `device_discovered` events with [`Client::subscribe`]
//! - **Acknowledgements**: Optionally confirm delivery with [`Config::ack_required`]
//!
//! ## Communication
//!
//! All communication with LIFX bulbs occurs over UDP on port 56700 using the
//! binary protocol implemented in [`codec`]. The bulbs must be reachable by
//! broadcast from this machine.
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod client;
pub mod codec;
mod config;
mod discovery;
mod dispatcher;
mod errors;
mod events;
mod registry;
pub mod runtime;
mod transport;
mod types;

#[cfg(test)]
mod testing;

// Re-export public API
pub use client::{Action, Client, ColorParams, Diagnostics};
pub use config::Config;
pub use discovery::{DiscoveryEngine, EngineState};
pub use dispatcher::{
    CommandDispatcher, Delivery, DeviceOutcome, DispatchReport, Intent, PendingAcks, Target,
};
pub use errors::{DecodeError, DispatchError, Error};
pub use events::{DEVICE_DISCOVERED, DeviceEvent, EventBridge, EventStream};
pub use registry::{ChangeKind, Device, DevicePatch, DeviceRegistry};
pub use transport::Transport;
pub use types::{DeviceId, Hsbk, Power};
