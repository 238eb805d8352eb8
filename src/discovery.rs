//! Device discovery via UDP broadcast.
//!
//! The engine periodically broadcasts `GetService` and turns every reply it
//! hears into a registry update. It also consumes state replies and command
//! acknowledgements, so it is the single reader of the client's socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::future::{AbortHandle, Aborted, abortable};
use log::{debug, info, warn};
use serde::Serialize;
use strum_macros::Display;

use crate::codec::{self, Header, Message, Packet, SERVICE_UDP};
use crate::config::Config;
use crate::dispatcher::PendingAcks;
use crate::errors::Error;
use crate::registry::{ChangeKind, DevicePatch, DeviceRegistry};
use crate::runtime::{self, AsyncUdpSocket, JoinHandle, UdpSocket};
use crate::transport::Transport;
use crate::types::{DeviceId, Power};

type Result<T> = std::result::Result<T, Error>;

/// Lifecycle of a [`DiscoveryEngine`].
///
/// `Stopped` is terminal: a stopped engine cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
}

/// Counters kept by the receive task.
#[derive(Debug, Default)]
struct Activity {
    last_packet: Option<Instant>,
    dropped: u64,
}

/// Periodic discovery plus handling of every inbound packet.
pub struct DiscoveryEngine<S: AsyncUdpSocket = UdpSocket> {
    transport: Option<Arc<Transport<S>>>,
    registry: DeviceRegistry,
    acks: PendingAcks,
    interval: Duration,
    query_state: bool,
    state: EngineState,
    activity: Arc<Mutex<Activity>>,
    tasks: Vec<(AbortHandle, JoinHandle<std::result::Result<(), Aborted>>)>,
}

impl<S: AsyncUdpSocket> DiscoveryEngine<S> {
    pub fn new(
        transport: Arc<Transport<S>>,
        registry: DeviceRegistry,
        acks: PendingAcks,
        config: &Config,
    ) -> Self {
        DiscoveryEngine {
            transport: Some(transport),
            registry,
            acks,
            interval: config.discovery_interval(),
            query_state: config.query_state_on_discovery,
            state: EngineState::Idle,
            activity: Arc::default(),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Start listening and broadcasting.
    ///
    /// The first broadcast goes out immediately, then one every discovery
    /// interval. Starting a running engine does nothing.
    pub fn start(&mut self) -> Result<()> {
        let transport = match (self.state, &self.transport) {
            (EngineState::Running, _) => return Ok(()),
            (EngineState::Idle, Some(transport)) => transport.clone(),
            _ => return Err(Error::EngineStopped),
        };

        let (queries_tx, queries_rx) = unbounded();
        let handler = PacketHandler {
            registry: self.registry.clone(),
            acks: self.acks.clone(),
            source: transport.source(),
            activity: self.activity.clone(),
            queries: self.query_state.then_some(queries_tx),
        };

        let receiver = transport.clone();
        self.spawn(async move {
            futures::future::join(
                receiver.receive_loop(move |bytes, from| handler.handle(bytes, from)),
                query_loop(&receiver, queries_rx),
            )
            .await;
        });

        let interval = self.interval;
        self.spawn(async move {
            loop {
                if let Err(e) = send_discovery(&transport).await {
                    warn!("discovery broadcast failed: {}", e);
                }
                runtime::sleep(interval).await;
            }
        });

        self.acks.set_listening(true);
        self.state = EngineState::Running;
        info!("discovery started, broadcasting every {:?}", self.interval);
        Ok(())
    }

    /// Broadcast one discovery request right away.
    pub async fn discover_now(&self) -> Result<()> {
        match (&self.transport, self.state) {
            (Some(transport), EngineState::Idle | EngineState::Running) => {
                send_discovery(transport).await
            }
            _ => Err(Error::EngineStopped),
        }
    }

    /// Cancel the background tasks and wait for them to finish.
    ///
    /// The engine releases its transport and cannot be restarted.
    pub async fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        self.acks.set_listening(false);
        for (abort, task) in std::mem::take(&mut self.tasks) {
            abort.abort();
            let _ = task.await;
        }
        self.transport = None;
        self.state = EngineState::Stopped;
        info!("discovery stopped");
    }

    /// When the last datagram was received, if ever.
    pub fn last_packet(&self) -> Option<Instant> {
        self.activity().last_packet
    }

    /// Datagrams dropped because they could not be decoded.
    pub fn dropped_packets(&self) -> u64 {
        self.activity().dropped
    }

    fn activity(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (future, abort) = abortable(future);
        self.tasks.push((abort, runtime::spawn(future)));
    }
}

impl<S: AsyncUdpSocket> Drop for DiscoveryEngine<S> {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            self.acks.set_listening(false);
        }
        for (abort, _) in &self.tasks {
            abort.abort();
        }
    }
}

async fn send_discovery<S: AsyncUdpSocket>(transport: &Transport<S>) -> Result<()> {
    let header = Header::broadcast(transport.source(), transport.next_sequence());
    debug!("broadcasting discovery to {}", transport.broadcast_addr());
    transport
        .broadcast(&Packet::new(header, Message::GetService))
        .await
}

/// Ask newly discovered devices for their power, color and label.
async fn query_loop<S: AsyncUdpSocket>(
    transport: &Transport<S>,
    mut queries: UnboundedReceiver<(DeviceId, SocketAddr)>,
) {
    while let Some((id, addr)) = queries.next().await {
        let header = Header::unicast(id, transport.source(), transport.next_sequence());
        if let Err(e) = transport
            .send_packet(&Packet::new(header, Message::LightGet), addr)
            .await
        {
            warn!("failed to query state of {} at {}: {}", id, addr, e);
        }
    }
}

/// Routes decoded packets to the registry and to waiting commands.
struct PacketHandler {
    registry: DeviceRegistry,
    acks: PendingAcks,
    source: u32,
    activity: Arc<Mutex<Activity>>,
    queries: Option<UnboundedSender<(DeviceId, SocketAddr)>>,
}

impl PacketHandler {
    fn handle(&self, bytes: &[u8], from: SocketAddr) {
        let packet = match codec::decode(bytes) {
            Ok(packet) => {
                self.record(false);
                packet
            }
            Err(e) => {
                debug!("dropping datagram from {}: {}", from, e);
                self.record(true);
                return;
            }
        };

        if packet.message.is_request() {
            debug!(
                "ignoring request type {} from {}",
                packet.message.message_type(),
                from
            );
            return;
        }
        let Some(id) = packet.header.target else {
            debug!("ignoring reply without target from {}", from);
            return;
        };

        let patch = match packet.message {
            Message::StateService { service, port } => {
                match u16::try_from(port) {
                    Ok(port) if service == SERVICE_UDP && port != 0 => {
                        DevicePatch::seen(SocketAddr::new(from.ip(), port))
                    }
                    _ => {
                        debug!(
                            "ignoring service {} on port {} from {}",
                            service, port, id
                        );
                        return;
                    }
                }
            }
            Message::StatePower { level } | Message::LightStatePower { level } => {
                DevicePatch::seen(from).power(Power::from_level(level))
            }
            Message::LightState {
                color,
                power,
                label,
            } => DevicePatch::seen(from)
                .color(color)
                .power(Power::from_level(power))
                .label(label),
            Message::Acknowledgement => {
                let sequence = packet.header.sequence;
                if packet.header.source != self.source {
                    debug!("ignoring acknowledgement for another client from {}", id);
                } else if !self.acks.complete(id, sequence, from) {
                    debug!("late acknowledgement from {} for sequence {}", id, sequence);
                }
                return;
            }
            _ => return,
        };

        let addr = patch.addr();
        if self.registry.upsert(id, patch) == ChangeKind::Added {
            info!("discovered {} at {}", id, addr);
            if let Some(queries) = &self.queries {
                let _ = queries.unbounded_send((id, addr));
            }
        }
    }

    fn record(&self, dropped: bool) {
        let mut activity = self.activity.lock().unwrap_or_else(PoisonError::into_inner);
        activity.last_packet = Some(Instant::now());
        if dropped {
            activity.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSocket, addr, device, reply, state_service};
    use crate::types::Hsbk;

    fn engine(config: Config) -> (MockSocket, DeviceRegistry, DiscoveryEngine<MockSocket>) {
        let socket = MockSocket::new();
        let transport = Arc::new(Transport::from_socket(socket.clone(), &config).unwrap());
        let registry = DeviceRegistry::default();
        let engine = DiscoveryEngine::new(transport, registry.clone(), PendingAcks::new(), &config);
        (socket, registry, engine)
    }

    fn quiet() -> Config {
        Config {
            discovery_interval_ms: 60_000,
            query_state_on_discovery: false,
            ..Config::default()
        }
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        runtime::timeout(Duration::from_secs(2), async {
            while !done() {
                runtime::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_two_devices_out_of_order() {
        let (socket, registry, mut engine) = engine(quiet());
        let mut events = registry.events().subscribe();
        engine.start().unwrap();

        socket.inject_packet(&state_service(device(2)), addr(2));
        socket.inject_packet(&state_service(device(1)), addr(1));

        let first = events.next().await.unwrap();
        let second = events.next().await.unwrap();
        assert_eq!(
            (first.kind, first.id()),
            (ChangeKind::Added, device(2))
        );
        assert_eq!(
            (second.kind, second.id()),
            (ChangeKind::Added, device(1))
        );

        let ids: Vec<_> = registry.list().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![device(1), device(2)]);
        assert_eq!(registry.get(&device(1)).unwrap().addr(), addr(1));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_first_broadcast_is_immediate() {
        let (socket, _, mut engine) = engine(quiet());
        engine.start().unwrap();

        socket.wait_for_sent(1).await;
        let (packet, to) = &socket.sent_packets()[0];
        assert_eq!(packet.message, Message::GetService);
        assert!(packet.header.tagged);
        assert_eq!(*to, Config::default().broadcast_addr);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_repeats_every_interval() {
        let (socket, _, mut engine) = engine(Config {
            discovery_interval_ms: 10,
            ..quiet()
        });
        engine.start().unwrap();
        socket.wait_for_sent(3).await;
        engine.stop().await;

        let count = socket.sent().len();
        runtime::sleep(Duration::from_millis(50)).await;
        assert_eq!(socket.sent().len(), count);
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let (socket, registry, mut engine) = engine(quiet());
        engine.start().unwrap();

        socket.inject(vec![0x24, 0x00, 0x00], addr(1));
        socket.inject_packet(&state_service(device(1)), addr(1));

        settle(|| registry.len() == 1).await;
        assert_eq!(engine.dropped_packets(), 1);
        assert!(engine.last_packet().is_some());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_duplicates_refresh_without_growing() {
        let (socket, registry, mut engine) = engine(quiet());
        let mut events = registry.events().subscribe();
        engine.start().unwrap();

        for _ in 0..3 {
            socket.inject_packet(&state_service(device(1)), addr(1));
        }
        let kinds: Vec<_> = events.by_ref().take(3).map(|e| e.kind).collect().await;
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Updated, ChangeKind::Updated]
        );
        assert_eq!(registry.len(), 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_ignored_packets() {
        let (socket, registry, mut engine) = engine(quiet());
        engine.start().unwrap();

        // Another client's discovery request.
        socket.inject_packet(
            &Packet::new(Header::broadcast(99, 0), Message::GetService),
            addr(50),
        );
        // A service other than UDP, and a disabled UDP service.
        let other = Message::StateService { service: 5, port: 56700 };
        socket.inject_packet(&reply(device(1), 0, 0, other), addr(1));
        let disabled = Message::StateService { service: 1, port: 0 };
        socket.inject_packet(&reply(device(2), 0, 0, disabled), addr(2));
        // A reply with an empty target.
        let untargeted = Message::StatePower { level: 65535 };
        socket.inject_packet(
            &Packet::new(Header::broadcast(0, 0), untargeted),
            addr(3),
        );
        // Then one that counts.
        socket.inject_packet(&state_service(device(4)), addr(4));

        settle(|| registry.len() == 1).await;
        assert!(registry.get(&device(4)).is_some());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_state_replies_fill_in_device() {
        let (socket, registry, mut engine) = engine(Config {
            query_state_on_discovery: true,
            ..quiet()
        });
        engine.start().unwrap();

        socket.inject_packet(&state_service(device(1)), addr(1));
        let (query, to) = socket
            .wait_for_packet(|p| p.message == Message::LightGet)
            .await;
        assert_eq!(to, addr(1));
        assert_eq!(query.header.target, Some(device(1)));

        let color = Hsbk::new(21845, 65535, 32768, 3500);
        let state = Message::LightState {
            color,
            power: 65535,
            label: "Kitchen".into(),
        };
        socket.inject_packet(&reply(device(1), 0, query.header.sequence, state), addr(1));

        settle(|| registry.get(&device(1)).is_some_and(|d| d.label().is_some())).await;
        let d = registry.get(&device(1)).unwrap();
        assert_eq!(d.label(), Some("Kitchen"));
        assert_eq!(d.color(), Some(&color));
        assert_eq!(d.power(), Some(Power::On));

        socket.inject_packet(
            &reply(device(1), 0, 0, Message::LightStatePower { level: 0 }),
            addr(1),
        );
        settle(|| registry.get(&device(1)).unwrap().power() == Some(Power::Off)).await;

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_acknowledgement_completes_waiter() {
        let config = Config {
            source: Some(7),
            ..quiet()
        };
        let socket = MockSocket::new();
        let transport = Arc::new(Transport::from_socket(socket.clone(), &config).unwrap());
        let acks = PendingAcks::new();
        let mut engine =
            DiscoveryEngine::new(transport, DeviceRegistry::default(), acks.clone(), &config);
        engine.start().unwrap();

        let waiter = acks.register(device(1), 3);
        // Acknowledgements for another client are not ours to complete.
        socket.inject_packet(&reply(device(1), 8, 3, Message::Acknowledgement), addr(1));
        socket.inject_packet(&reply(device(1), 7, 3, Message::Acknowledgement), addr(1));

        let from = runtime::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, addr(1));
        assert!(acks.is_empty());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (_, _, mut engine) = engine(quiet());
        assert_eq!(engine.state(), EngineState::Idle);

        assert!(!engine.acks.is_listening());

        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.acks.is_listening());
        engine.discover_now().await.unwrap();

        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.acks.is_listening());
        assert_eq!(engine.start(), Err(Error::EngineStopped));
        assert_eq!(engine.discover_now().await, Err(Error::EngineStopped));
    }
}
