//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::MockTransport;
pub use self::nusb::{NusbConnector, NusbTransport};
pub use traits::{Deadline, DeviceConnector, TransportError, UsbTransport};
