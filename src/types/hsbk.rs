//! Hue, saturation, brightness and kelvin color representation.

use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;

/// A LIFX color.
///
/// All components use the full 16-bit range of the LAN protocol:
/// - Hue: the color angle on the color wheel, `0..=65535` maps to 0-360 degrees
/// - Saturation: `0` is white, `65535` is the pure color
/// - Brightness: `0` is off, `65535` is full brightness
/// - Kelvin: color temperature of whites, only relevant when saturation is low
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Hsbk {
    pub fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Hsbk {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// Build a color from unchecked components.
    ///
    /// Fails with [`DispatchError::InvalidParameter`] naming the first
    /// component that does not fit in 16 bits.
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Hsbk;
    ///
    /// assert!(Hsbk::checked(21845, 65535, 65535, 3500).is_ok());
    /// assert!(Hsbk::checked(70000, 0, 0, 3500).is_err());
    /// assert!(Hsbk::checked(0, 0, 65536, 3500).is_err());
    /// ```
    pub fn checked(
        hue: u32,
        saturation: u32,
        brightness: u32,
        kelvin: u16,
    ) -> Result<Self, DispatchError> {
        Ok(Hsbk {
            hue: component("hue", hue)?,
            saturation: component("saturation", saturation)?,
            brightness: component("brightness", brightness)?,
            kelvin,
        })
    }

    /// Hue converted to degrees (0-360).
    ///
    /// # Examples
    ///
    /// ```
    /// use lifx_lights_rs::Hsbk;
    ///
    /// assert_eq!(Hsbk::new(0, 0, 0, 3500).hue_degrees(), 0.0);
    /// assert_eq!(Hsbk::new(65535, 0, 0, 3500).hue_degrees(), 360.0);
    /// ```
    pub fn hue_degrees(&self) -> f32 {
        self.hue as f32 * 360.0 / u16::MAX as f32
    }
}

fn component(name: &'static str, value: u32) -> Result<u16, DispatchError> {
    u16::try_from(value).map_err(|_| DispatchError::InvalidParameter { name, value })
}
