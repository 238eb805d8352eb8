//! Ordered delivery of registry changes to observers.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::mpsc::{Receiver, Sender, channel};
use log::{debug, warn};
use serde::Serialize;

use crate::registry::{ChangeKind, Device};
use crate::types::DeviceId;

/// Event name a front-end listens for.
pub const DEVICE_DISCOVERED: &str = "device_discovered";

/// A device was added to or updated in the registry.
///
/// Serializes flat, e.g. `{"kind":"added","id":"d0:73:d5:01:02:03","addr":"192.168.1.10:56700"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEvent {
    pub kind: ChangeKind,
    #[serde(flatten)]
    pub device: Device,
}

impl DeviceEvent {
    pub fn new(kind: ChangeKind, device: Device) -> Self {
        DeviceEvent { kind, device }
    }

    pub fn name(&self) -> &'static str {
        DEVICE_DISCOVERED
    }

    pub fn id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn addr(&self) -> SocketAddr {
        self.device.addr()
    }
}

/// Stream of events for one subscriber.
pub type EventStream = Receiver<DeviceEvent>;

/// Events a subscriber may fall behind by before it is dropped.
pub const DEFAULT_BACKLOG: usize = 1024;

/// Fan-out of device events to any number of subscribers.
///
/// Each subscriber has its own bounded queue and publishing never waits for
/// a slow consumer. Every subscriber sees every event published after it
/// subscribed, once, in publish order. A subscriber that is dropped, or
/// that lets its queue fill up, is removed on the next publish; its stream
/// then ends after the events already queued.
#[derive(Clone)]
pub struct EventBridge {
    subscribers: Arc<Mutex<Vec<Sender<DeviceEvent>>>>,
    backlog: usize,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::with_backlog(DEFAULT_BACKLOG)
    }
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bridge whose subscribers may lag by at most `backlog` events.
    pub fn with_backlog(backlog: usize) -> Self {
        EventBridge {
            subscribers: Arc::default(),
            backlog,
        }
    }

    /// Receive every event published from now on.
    ///
    /// Keep polling the stream: discovery refreshes each device every
    /// interval, and a subscriber more than the backlog behind is dropped.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = channel(self.backlog);
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: DeviceEvent) {
        let mut subscribers = self.lock();
        subscribers.retain_mut(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(e) if e.is_full() => {
                warn!("dropping event subscriber more than {} events behind", self.backlog);
                tx.close_channel();
                false
            }
            Err(_) => {
                debug!("dropping closed event subscriber");
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<DeviceEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
