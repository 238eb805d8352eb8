//! Turning control intents into packets for one or many devices.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;

use crate::codec::{Header, Message, Packet};
use crate::config::Config;
use crate::errors::DispatchError;
use crate::registry::{Device, DevicePatch, DeviceRegistry};
use crate::runtime::{self, AsyncUdpSocket, UdpSocket};
use crate::transport::Transport;
use crate::types::{DeviceId, Hsbk, Power};

/// A control command, independent of which devices receive it.
///
/// Color components are taken as `u32` so out-of-range input from a
/// front-end can be rejected instead of silently truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    PowerOn,
    PowerOff,
    SetColor {
        hue: u32,
        saturation: u32,
        brightness: u32,
        duration_ms: u32,
    },
}

impl Intent {
    /// Validate the intent and build the message it is sent as.
    fn message(&self, kelvin: u16, power_transition_ms: u32) -> Result<Message, DispatchError> {
        let message = match *self {
            Intent::PowerOn => Message::LightSetPower {
                level: Power::On.level(),
                duration: power_transition_ms,
            },
            Intent::PowerOff => Message::LightSetPower {
                level: Power::Off.level(),
                duration: power_transition_ms,
            },
            Intent::SetColor {
                hue,
                saturation,
                brightness,
                duration_ms,
            } => Message::LightSetColor {
                color: Hsbk::checked(hue, saturation, brightness, kelvin)?,
                duration: duration_ms,
            },
        };
        Ok(message)
    }
}

/// Which devices a command goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// One device, addressed even when stale.
    Single(DeviceId),
    /// Every device that is not stale.
    Broadcast,
}

/// What happened to the packet sent to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Delivery {
    /// Handed to the network; no confirmation was requested.
    Sent,
    /// The device confirmed receipt.
    Acknowledged,
    /// Sent, but no acknowledgement arrived in time.
    AckTimedOut,
    /// The send itself failed.
    Failed { reason: String },
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        matches!(self, Delivery::Sent | Delivery::Acknowledged)
    }
}

/// Per-device result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub id: DeviceId,
    pub addr: SocketAddr,
    #[serde(flatten)]
    pub delivery: Delivery,
}

/// Result of a command across all targeted devices.
///
/// Unreachable devices show up here as failed outcomes; they never turn
/// the whole command into an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<DeviceOutcome>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| o.delivery.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.delivery.is_success())
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }
}

/// Commands waiting for an acknowledgement, keyed by device and sequence.
///
/// The dispatcher registers a waiter before sending; the discovery engine
/// completes it when the matching `Acknowledgement` arrives, and marks the
/// table as listening only while its receive loop runs.
#[derive(Clone, Default)]
pub struct PendingAcks {
    waiters: Arc<Mutex<HashMap<(DeviceId, u8), oneshot::Sender<SocketAddr>>>>,
    listening: Arc<AtomicBool>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: DeviceId, sequence: u8) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert((id, sequence), tx);
        rx
    }

    fn cancel(&self, id: DeviceId, sequence: u8) {
        self.lock().remove(&(id, sequence));
    }

    /// Wake the command waiting on `(id, sequence)`.
    ///
    /// Returns `false` when nothing was waiting, e.g. because it timed out.
    pub(crate) fn complete(&self, id: DeviceId, sequence: u8, from: SocketAddr) -> bool {
        match self.lock().remove(&(id, sequence)) {
            Some(tx) => tx.send(from).is_ok(),
            None => false,
        }
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
    }

    /// Whether something is receiving acknowledgements right now.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(DeviceId, u8), oneshot::Sender<SocketAddr>>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sends intents to devices from the registry.
pub struct CommandDispatcher<S: AsyncUdpSocket = UdpSocket> {
    transport: Arc<Transport<S>>,
    registry: DeviceRegistry,
    acks: PendingAcks,
    stale_after: Duration,
    ack_required: bool,
    ack_timeout: Duration,
    kelvin: u16,
    power_transition_ms: u32,
}

impl<S: AsyncUdpSocket> CommandDispatcher<S> {
    pub fn new(
        transport: Arc<Transport<S>>,
        registry: DeviceRegistry,
        acks: PendingAcks,
        config: &Config,
    ) -> Self {
        CommandDispatcher {
            transport,
            registry,
            acks,
            stale_after: config.stale_after(),
            ack_required: config.ack_required,
            ack_timeout: config.ack_timeout(),
            kelvin: config.kelvin,
            power_transition_ms: config.power_transition_ms,
        }
    }

    /// Send `intent` to the devices selected by `target`.
    ///
    /// Parameters are validated before anything is sent. Sends to multiple
    /// devices run concurrently and all finish before this returns.
    ///
    /// With acknowledgements enabled, fails with
    /// [`DispatchError::NotListening`] unless discovery is running, since
    /// no acknowledgement could be received.
    pub async fn execute(
        &self,
        intent: &Intent,
        target: &Target,
    ) -> Result<DispatchReport, DispatchError> {
        let message = intent.message(self.kelvin, self.power_transition_ms)?;
        if self.ack_required && !self.acks.is_listening() {
            return Err(DispatchError::NotListening);
        }

        let devices = match target {
            Target::Single(id) => vec![
                self.registry
                    .get(id)
                    .ok_or(DispatchError::UnknownDevice(*id))?,
            ],
            Target::Broadcast => self.registry.list_active(self.stale_after),
        };

        if devices.is_empty() {
            debug!("no active devices for {:?}", intent);
            return Ok(DispatchReport::default());
        }

        let outcomes = join_all(devices.iter().map(|d| self.deliver(d, &message))).await;
        Ok(DispatchReport { outcomes })
    }

    async fn deliver(&self, device: &Device, message: &Message) -> DeviceOutcome {
        let id = device.id();
        let addr = device.addr();
        let sequence = self.transport.next_sequence();
        let header =
            Header::unicast(id, self.transport.source(), sequence).with_ack(self.ack_required);
        let packet = Packet::new(header, message.clone());

        let ack = self
            .ack_required
            .then(|| self.acks.register(id, sequence));

        let delivery = match self.transport.send_packet(&packet, addr).await {
            Err(e) => {
                warn!("failed to send to {} at {}: {}", id, addr, e);
                self.acks.cancel(id, sequence);
                Delivery::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(()) => match ack {
                None => Delivery::Sent,
                Some(rx) => match runtime::timeout(self.ack_timeout, rx).await {
                    Ok(Ok(from)) => {
                        self.record_acknowledged(id, from, message);
                        Delivery::Acknowledged
                    }
                    _ => {
                        debug!("no acknowledgement from {} for sequence {}", id, sequence);
                        self.acks.cancel(id, sequence);
                        Delivery::AckTimedOut
                    }
                },
            },
        };

        DeviceOutcome { id, addr, delivery }
    }

    /// The device confirmed the command, so its effect is now known state.
    fn record_acknowledged(&self, id: DeviceId, from: SocketAddr, message: &Message) {
        let patch = DevicePatch::seen(from);
        let patch = match message {
            Message::LightSetPower { level, .. } => patch.power(Power::from_level(*level)),
            Message::LightSetColor { color, .. } => patch.color(*color),
            _ => patch,
        };
        self.registry.upsert(id, patch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSocket, addr, device};

    struct Fixture {
        socket: MockSocket,
        registry: DeviceRegistry,
        acks: PendingAcks,
        dispatcher: CommandDispatcher<MockSocket>,
    }

    fn fixture(config: Config) -> Fixture {
        let socket = MockSocket::new();
        let transport = Arc::new(Transport::from_socket(socket.clone(), &config).unwrap());
        let registry = DeviceRegistry::default();
        let acks = PendingAcks::new();
        let dispatcher = CommandDispatcher::new(transport, registry.clone(), acks.clone(), &config);
        Fixture {
            socket,
            registry,
            acks,
            dispatcher,
        }
    }

    fn red() -> Intent {
        Intent::SetColor {
            hue: 0,
            saturation: 65535,
            brightness: 65535,
            duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_invalid_color_sends_nothing() {
        let f = fixture(Config::default());
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));

        let intent = Intent::SetColor {
            hue: 70000,
            saturation: 0,
            brightness: 0,
            duration_ms: 0,
        };
        let err = f
            .dispatcher
            .execute(&intent, &Target::Broadcast)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::InvalidParameter {
                name: "hue",
                value: 70000
            }
        );
        assert!(f.socket.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_single_target() {
        let f = fixture(Config::default());
        let err = f
            .dispatcher
            .execute(&Intent::PowerOn, &Target::Single(device(7)))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::UnknownDevice(device(7)));
        assert!(f.socket.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_devices() {
        let f = fixture(Config::default());
        let report = f
            .dispatcher
            .execute(&Intent::PowerOff, &Target::Broadcast)
            .await
            .unwrap();
        assert!(report.is_empty());
        assert!(f.socket.sent().is_empty());
    }

    #[tokio::test]
    async fn test_single_target_packet() {
        let f = fixture(Config {
            power_transition_ms: 250,
            ..Config::default()
        });
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));

        let report = f
            .dispatcher
            .execute(&Intent::PowerOn, &Target::Single(device(1)))
            .await
            .unwrap();
        assert_eq!(report.outcomes[0].delivery, Delivery::Sent);

        let sent = f.socket.sent_packets();
        assert_eq!(sent.len(), 1);
        let (packet, to) = &sent[0];
        assert_eq!(*to, addr(1));
        assert_eq!(packet.header.target, Some(device(1)));
        assert!(!packet.header.tagged);
        assert!(!packet.header.ack_required);
        assert_eq!(
            packet.message,
            Message::LightSetPower {
                level: 65535,
                duration: 250
            }
        );

        // Without acknowledgements the registry is not touched.
        assert_eq!(f.registry.get(&device(1)).unwrap().power(), None);
    }

    #[tokio::test]
    async fn test_broadcast_with_one_failing_device() {
        let f = fixture(Config::default());
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));
        f.registry.upsert(device(2), DevicePatch::seen(addr(2)));
        f.socket.fail_sends_to(addr(2));

        let report = f
            .dispatcher
            .execute(&red(), &Target::Broadcast)
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        let ok: Vec<_> = report.succeeded().map(|o| o.id).collect();
        let failed: Vec<_> = report.failed().map(|o| o.id).collect();
        assert_eq!(ok, vec![device(1)]);
        assert_eq!(failed, vec![device(2)]);
        assert!(matches!(
            report.failed().next().unwrap().delivery,
            Delivery::Failed { .. }
        ));

        let sent = f.socket.sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0.message,
            Message::LightSetColor {
                color: Hsbk::new(0, 65535, 65535, 3500),
                duration: 0
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_skips_stale_but_single_does_not() {
        let f = fixture(Config {
            stale_after_ms: 1_000,
            ..Config::default()
        });
        let long_ago = std::time::Instant::now()
            .checked_sub(Duration::from_secs(60))
            .unwrap();
        f.registry
            .upsert(device(1), DevicePatch::seen(addr(1)).at(long_ago));
        f.registry.upsert(device(2), DevicePatch::seen(addr(2)));

        let report = f
            .dispatcher
            .execute(&Intent::PowerOff, &Target::Broadcast)
            .await
            .unwrap();
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![device(2)]);

        let report = f
            .dispatcher
            .execute(&Intent::PowerOff, &Target::Single(device(1)))
            .await
            .unwrap();
        assert_eq!(report.succeeded().count(), 1);
    }

    #[tokio::test]
    async fn test_acknowledged_command_updates_registry() {
        let f = fixture(Config {
            ack_required: true,
            ..Config::default()
        });
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));
        f.acks.set_listening(true);

        let target = Target::Single(device(1));
        let responder = async {
            let (packet, to) = f
                .socket
                .wait_for_packet(|p| p.header.ack_required)
                .await;
            assert!(f.acks.complete(device(1), packet.header.sequence, to));
        };
        let (report, ()) = futures::join!(
            f.dispatcher.execute(&Intent::PowerOn, &target),
            responder
        );

        assert_eq!(report.unwrap().outcomes[0].delivery, Delivery::Acknowledged);
        assert_eq!(f.registry.get(&device(1)).unwrap().power(), Some(Power::On));
        assert!(f.acks.is_empty());
    }

    #[tokio::test]
    async fn test_missing_acknowledgement_times_out() {
        let f = fixture(Config {
            ack_required: true,
            ack_timeout_ms: 20,
            ..Config::default()
        });
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));
        f.acks.set_listening(true);

        let report = f
            .dispatcher
            .execute(&red(), &Target::Broadcast)
            .await
            .unwrap();
        assert_eq!(report.outcomes[0].delivery, Delivery::AckTimedOut);
        assert_eq!(report.failed().count(), 1);
        assert!(f.registry.get(&device(1)).unwrap().color().is_none());
        assert!(f.acks.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_command_needs_a_listener() {
        let f = fixture(Config {
            ack_required: true,
            ..Config::default()
        });
        f.registry.upsert(device(1), DevicePatch::seen(addr(1)));

        let err = f
            .dispatcher
            .execute(&Intent::PowerOn, &Target::Single(device(1)))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::NotListening);
        assert!(f.socket.sent().is_empty());
        assert!(f.acks.is_empty());

        // Invalid parameters are still reported first.
        let err = f
            .dispatcher
            .execute(
                &Intent::SetColor {
                    hue: 0,
                    saturation: 0,
                    brightness: 70000,
                    duration_ms: 0,
                },
                &Target::Broadcast,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidParameter { .. }));
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let report = DispatchReport {
            outcomes: vec![DeviceOutcome {
                id: device(1),
                addr: addr(1),
                delivery: Delivery::Failed {
                    reason: "unreachable".into(),
                },
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "failed");
        assert_eq!(json["outcomes"][0]["reason"], "unreachable");
        assert_eq!(json["outcomes"][0]["id"], "d0:73:d5:00:00:01");
    }
}
