//! Power state of a light.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Power state for a light.
///
/// The LAN protocol carries power as a 16-bit level where only `0` and
/// `65535` are documented. Any non-zero level reported by a device is
/// treated as [`Power::On`].
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use lifx_lights_rs::Power;
///
/// assert_eq!(Power::from_level(0), Power::Off);
/// assert_eq!(Power::from_level(1), Power::On);
/// assert_eq!(Power::On.level(), 65535);
/// assert_eq!(Power::from_str("off").unwrap(), Power::Off);
/// assert_eq!(Power::On.to_string(), "on");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Power {
    /// Turn the light on
    On,
    /// Turn the light off
    Off,
}

impl Power {
    const ON_LEVEL: u16 = u16::MAX;
    const OFF_LEVEL: u16 = 0;

    /// Interpret a power level received from a device.
    pub fn from_level(level: u16) -> Self {
        if level == Self::OFF_LEVEL {
            Power::Off
        } else {
            Power::On
        }
    }

    /// The wire level to send for this power state.
    pub fn level(&self) -> u16 {
        match self {
            Power::On => Self::ON_LEVEL,
            Power::Off => Self::OFF_LEVEL,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Power::On)
    }
}
