//! Client configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::DEFAULT_PORT;

/// Tunables for discovery, staleness and command delivery.
///
/// Every field has a default, so partial documents deserialize cleanly:
///
/// ```
/// use lifx_lights_rs::Config;
///
/// let config = Config::default();
/// assert_eq!(config.discovery_interval().as_secs(), 5);
/// assert_eq!(config.stale_after().as_secs(), 30);
/// assert!(!config.ack_required);
/// ```
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Local address to bind; port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Where discovery requests are sent.
    pub broadcast_addr: SocketAddr,
    pub discovery_interval_ms: u64,
    /// Devices not heard from for this long are left out of broadcast commands.
    pub stale_after_ms: u64,
    /// Ask devices to acknowledge commands and wait for it.
    pub ack_required: bool,
    pub ack_timeout_ms: u64,
    /// Color temperature sent along with color commands.
    pub kelvin: u16,
    /// Transition time used by power commands.
    pub power_transition_ms: u32,
    /// Query power, color and label of a device as soon as it is discovered.
    pub query_state_on_discovery: bool,
    /// Client identifier stamped on outgoing packets; random when unset.
    pub source: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            broadcast_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT)),
            discovery_interval_ms: 5_000,
            stale_after_ms: 30_000,
            ack_required: false,
            ack_timeout_ms: 500,
            kelvin: 3_500,
            power_transition_ms: 0,
            query_state_on_discovery: true,
            source: None,
        }
    }
}

impl Config {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}
