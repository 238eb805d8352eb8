//! The entry point a front-end talks to.

use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::config::Config;
use crate::discovery::{DiscoveryEngine, EngineState};
use crate::dispatcher::{CommandDispatcher, DispatchReport, Intent, PendingAcks, Target};
use crate::errors::Error;
use crate::events::EventStream;
use crate::registry::{Device, DeviceRegistry};
use crate::runtime::{AsyncUdpSocket, UdpSocket};
use crate::transport::Transport;
use crate::types::DeviceId;

type Result<T> = std::result::Result<T, Error>;

/// Named actions a front-end can trigger.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use lifx_lights_rs::Action;
///
/// assert_eq!(Action::from_str("power-on").unwrap(), Action::PowerOn);
/// assert_eq!(Action::SetColor.to_string(), "set-color");
/// assert!(Action::from_str("reboot").is_err());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    Discover,
    PowerOn,
    PowerOff,
    SetColor,
}

/// Color arguments of the `set-color` action.
///
/// Components use the 16-bit protocol range; larger values are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorParams {
    pub hue: u32,
    pub saturation: u32,
    pub brightness: u32,
    pub duration_ms: u32,
}

/// Snapshot of the client for troubleshooting.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub state: EngineState,
    pub known_devices: usize,
    pub active_devices: usize,
    pub source: u32,
    pub local_addr: Option<SocketAddr>,
    pub time_since_last_packet: Option<f64>,
    pub dropped_packets: u64,
    pub subscribers: usize,
}

/// Discovers LIFX devices and sends them commands.
///
/// # Examples
///
/// ```ignore
/// use lifx_lights_rs::{Client, Config, Target};
///
/// let mut client = Client::bind(Config::default()).await?;
/// let mut events = client.subscribe();
/// client.start()?;
///
/// // ... wait for devices to show up on `events`
/// let report = client.power_on(Target::Broadcast).await?;
/// println!("{} devices switched on", report.succeeded().count());
///
/// client.shutdown().await;
/// ```
pub struct Client<S: AsyncUdpSocket = UdpSocket> {
    config: Config,
    transport: Arc<Transport<S>>,
    registry: DeviceRegistry,
    engine: DiscoveryEngine<S>,
    dispatcher: CommandDispatcher<S>,
}

impl Client<UdpSocket> {
    /// Bind a UDP socket as configured and build a client on it.
    pub async fn bind(config: Config) -> Result<Self> {
        let transport = Transport::bind(&config).await?;
        Ok(Self::from_transport(transport, config))
    }
}

impl<S: AsyncUdpSocket> Client<S> {
    /// Build a client on an already bound socket.
    pub fn with_socket(socket: S, config: Config) -> Result<Self> {
        let transport = Transport::from_socket(socket, &config)?;
        Ok(Self::from_transport(transport, config))
    }

    fn from_transport(transport: Transport<S>, config: Config) -> Self {
        let transport = Arc::new(transport);
        let registry = DeviceRegistry::default();
        let acks = PendingAcks::new();
        let engine = DiscoveryEngine::new(transport.clone(), registry.clone(), acks.clone(), &config);
        let dispatcher = CommandDispatcher::new(transport.clone(), registry.clone(), acks, &config);
        Client {
            config,
            transport,
            registry,
            engine,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start background discovery.
    pub fn start(&mut self) -> Result<()> {
        self.engine.start()
    }

    /// Stop background discovery.
    ///
    /// Commands can still be sent afterwards, unless acknowledgements are
    /// required: those fail with
    /// [`DispatchError::NotListening`](crate::DispatchError::NotListening).
    pub async fn stop(&mut self) {
        self.engine.stop().await
    }

    /// Stop discovery and release the socket.
    pub async fn shutdown(mut self) {
        self.engine.stop().await;
        info!("client {:#010x} shut down", self.transport.source());
    }

    /// The `discover` action: broadcast one discovery request now.
    pub async fn discover(&self) -> Result<()> {
        self.engine.discover_now().await
    }

    pub async fn power_on(&self, target: Target) -> Result<DispatchReport> {
        self.execute(Intent::PowerOn, target).await
    }

    pub async fn power_off(&self, target: Target) -> Result<DispatchReport> {
        self.execute(Intent::PowerOff, target).await
    }

    pub async fn set_color(
        &self,
        target: Target,
        hue: u32,
        saturation: u32,
        brightness: u32,
        duration_ms: u32,
    ) -> Result<DispatchReport> {
        let intent = Intent::SetColor {
            hue,
            saturation,
            brightness,
            duration_ms,
        };
        self.execute(intent, target).await
    }

    pub async fn execute(&self, intent: Intent, target: Target) -> Result<DispatchReport> {
        Ok(self.dispatcher.execute(&intent, &target).await?)
    }

    /// Run a named action.
    ///
    /// `discover` broadcasts and returns an empty report; `params` is only
    /// read by `set-color`.
    pub async fn perform(
        &self,
        action: Action,
        target: Target,
        params: ColorParams,
    ) -> Result<DispatchReport> {
        match action {
            Action::Discover => {
                self.discover().await?;
                Ok(DispatchReport::default())
            }
            Action::PowerOn => self.power_on(target).await,
            Action::PowerOff => self.power_off(target).await,
            Action::SetColor => {
                self.set_color(
                    target,
                    params.hue,
                    params.saturation,
                    params.brightness,
                    params.duration_ms,
                )
                .await
            }
        }
    }

    /// Receive a `device_discovered` event for every future registry change.
    ///
    /// The stream must be polled or dropped; one that falls too far behind
    /// is closed. See [`EventBridge`](crate::EventBridge).
    pub fn subscribe(&self) -> EventStream {
        self.registry.events().subscribe()
    }

    /// All known devices, stale ones included.
    pub fn devices(&self) -> Vec<Device> {
        self.registry.list()
    }

    /// Devices a broadcast command would reach.
    pub fn active_devices(&self) -> Vec<Device> {
        self.registry.list_active(self.config.stale_after())
    }

    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.registry.get(id)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            state: self.engine.state(),
            known_devices: self.registry.len(),
            active_devices: self.active_devices().len(),
            source: self.transport.source(),
            local_addr: self.transport.local_addr().ok(),
            time_since_last_packet: self
                .engine
                .last_packet()
                .map(|t| t.elapsed().as_secs_f64()),
            dropped_packets: self.engine.dropped_packets(),
            subscribers: self.registry.events().subscriber_count(),
        }
    }
}
