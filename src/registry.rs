//! The registry of known devices.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use strum_macros::Display;

use crate::events::{DeviceEvent, EventBridge};
use crate::types::{DeviceId, Hsbk, Power};

/// A LIFX device as last heard from.
///
/// Power, color and label stay `None` until a message carrying them arrives.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    id: DeviceId,
    addr: SocketAddr,
    #[serde(skip)]
    last_seen: Instant,
    power: Option<Power>,
    color: Option<Hsbk>,
    label: Option<String>,
}

impl Device {
    fn new(id: DeviceId, patch: DevicePatch) -> Self {
        Device {
            id,
            addr: patch.addr,
            last_seen: patch.seen_at,
            power: patch.power,
            color: patch.color,
            label: patch.label,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn power(&self) -> Option<Power> {
        self.power
    }

    pub fn color(&self) -> Option<&Hsbk> {
        self.color.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether the device was last heard from more than `threshold` before `now`.
    pub fn is_stale_at(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > threshold
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.is_stale_at(threshold, Instant::now())
    }

    /// Merge a patch: address and timestamp always, the rest only when present.
    fn apply(&mut self, patch: DevicePatch) {
        self.addr = patch.addr;
        self.last_seen = patch.seen_at;
        if let Some(power) = patch.power {
            self.power = Some(power);
        }
        if let Some(color) = patch.color {
            self.color = Some(color);
        }
        if let Some(label) = patch.label {
            self.label = Some(label);
        }
    }
}

/// An update to apply to a device record.
///
/// # Examples
///
/// ```
/// use std::net::SocketAddr;
/// use lifx_lights_rs::{DeviceId, DevicePatch, DeviceRegistry, Power};
///
/// let registry = DeviceRegistry::default();
/// let id = DeviceId::new([0xd0, 0x73, 0xd5, 0, 0, 1]);
/// let addr: SocketAddr = "192.168.1.10:56700".parse().unwrap();
///
/// registry.upsert(id, DevicePatch::seen(addr));
/// assert!(registry.get(&id).unwrap().power().is_none());
///
/// registry.upsert(id, DevicePatch::seen(addr).power(Power::On));
/// assert_eq!(registry.get(&id).unwrap().power(), Some(Power::On));
/// ```
#[derive(Debug, Clone)]
pub struct DevicePatch {
    addr: SocketAddr,
    seen_at: Instant,
    power: Option<Power>,
    color: Option<Hsbk>,
    label: Option<String>,
}

impl DevicePatch {
    /// The device was heard from at `addr` just now.
    pub fn seen(addr: SocketAddr) -> Self {
        DevicePatch {
            addr,
            seen_at: Instant::now(),
            power: None,
            color: None,
            label: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Override when the device was heard from.
    pub fn at(mut self, seen_at: Instant) -> Self {
        self.seen_at = seen_at;
        self
    }

    pub fn power(mut self, power: Power) -> Self {
        self.power = Some(power);
        self
    }

    pub fn color(mut self, color: Hsbk) -> Self {
        self.color = Some(color);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// What an upsert did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
}

/// Concurrency-safe store of known devices, keyed by identity.
///
/// Clones share the same store. Writes are serialized; readers get cloned
/// snapshots and never observe a half-applied patch. Every upsert publishes
/// a [`DeviceEvent`] on the registry's [`EventBridge`] before the write lock
/// is released, so events arrive in the order upserts were applied.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
    events: EventBridge,
}

impl DeviceRegistry {
    pub fn new(events: EventBridge) -> Self {
        DeviceRegistry {
            devices: Arc::default(),
            events,
        }
    }

    /// The bridge that receives this registry's change notifications.
    pub fn events(&self) -> &EventBridge {
        &self.events
    }

    /// Insert a new device or merge `patch` into the existing one.
    pub fn upsert(&self, id: DeviceId, patch: DevicePatch) -> ChangeKind {
        let mut devices = self.write();
        let (kind, snapshot) = match devices.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().apply(patch);
                (ChangeKind::Updated, entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let device = entry.insert(Device::new(id, patch));
                (ChangeKind::Added, device.clone())
            }
        };
        self.events.publish(DeviceEvent::new(kind, snapshot));
        kind
    }

    pub fn get(&self, id: &DeviceId) -> Option<Device> {
        self.read().get(id).cloned()
    }

    /// Every known device, stale ones included, ordered by identity.
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.read().values().cloned().collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    /// Devices heard from within `threshold`, ordered by identity.
    pub fn list_active(&self, threshold: Duration) -> Vec<Device> {
        self.list_active_at(threshold, Instant::now())
    }

    /// Like [`DeviceRegistry::list_active`], measured against `now`.
    pub fn list_active_at(&self, threshold: Duration, now: Instant) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .read()
            .values()
            .filter(|d| !d.is_stale_at(threshold, now))
            .cloned()
            .collect();
        devices.sort_by_key(|d| d.id);
        devices
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-applied patch behind
    // (`apply` only assigns fields), so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<DeviceId, Device>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DeviceId, Device>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }
}
