//! Hardware identity of a LIFX device.

use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::errors::Error;

/// The 48-bit hardware identifier (MAC address) of a device.
///
/// Identity is independent of the network address: a bulb that changes IP
/// keeps its `DeviceId`.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use lifx_lights_rs::DeviceId;
///
/// let id = DeviceId::from_str("d0:73:d5:01:02:03").unwrap();
/// assert_eq!(id.to_string(), "d0:73:d5:01:02:03");
/// assert_eq!(DeviceId::from_str("D073D5010203").unwrap(), id);
/// assert!(DeviceId::from_str("d0:73:d5").is_err());
/// ```
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct DeviceId([u8; 6]);

impl DeviceId {
    pub const fn new(bytes: [u8; 6]) -> Self {
        DeviceId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Extract the identity from a header target field.
    ///
    /// An all-zero target addresses every device and carries no identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::DeviceId;
    ///
    /// assert!(DeviceId::from_target([0; 8]).is_none());
    ///
    /// let id = DeviceId::from_target([0xd0, 0x73, 0xd5, 1, 2, 3, 0, 0]).unwrap();
    /// assert_eq!(id.to_target(), [0xd0, 0x73, 0xd5, 1, 2, 3, 0, 0]);
    /// ```
    pub fn from_target(target: [u8; 8]) -> Option<Self> {
        if target.iter().all(|b| *b == 0) {
            return None;
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&target[..6]);
        Some(DeviceId(bytes))
    }

    /// The 8-byte header target field addressing this device.
    pub fn to_target(&self) -> [u8; 8] {
        let mut target = [0u8; 8];
        target[..6].copy_from_slice(&self.0);
        target
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({self})")
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    /// Parse from colon/dash separated or bare hex (e.g., "d0:73:d5:01:02:03").
    fn from_str(s: &str) -> Result<Self, Error> {
        let hex: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidDeviceId(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (idx, slot) in bytes.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&hex[idx * 2..idx * 2 + 2], 16)
                .map_err(|_| Error::InvalidDeviceId(s.to_string()))?;
        }
        Ok(DeviceId(bytes))
    }
}

impl From<[u8; 6]> for DeviceId {
    fn from(bytes: [u8; 6]) -> Self {
        DeviceId(bytes)
    }
}
