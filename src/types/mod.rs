//! Value types shared by the codec, the registry and the dispatcher.

mod device_id;
mod hsbk;
mod power;

pub use device_id::DeviceId;
pub use hsbk::Hsbk;
pub use power::Power;
