//! PCD-Core: exclusive session driver for USB-attached PCD devices.
//!
//! This crate implements the command/response layer of the PCD400 USB
//! interface: an exclusive session over a single device, bounded transfers,
//! exact-size framing, presence checks and target reset.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: USB capability abstraction (nusb, mock)
//! - **Registry**: Process-wide (and cross-process) exclusive lock
//! - **Session**: Open handle owning the timeout; serializes transfers
//! - **Channel**: Send/receive framing and outcome translation
//! - **Presence**: Connected/not-connected query, no session required
//! - **Events**: Observer pattern for UI decoupling
//!
//! Every operation reports one of the [`PcdError`] outcomes, each with a
//! stable integer code (see [`protocol`]).
//!
//! # Example
//!
//! ```no_run
//! use pcd_core::{DeviceRegistry, ReplyBuffer, Session, SessionConfig};
//!
//! let config = SessionConfig::default();
//! let registry = DeviceRegistry::global();
//! let session = Session::open_configured(&registry, &config)?;
//!
//! session.set_timeout(5)?;
//! session.send(&[0x01, 0x02])?;
//!
//! let mut storage = [0u8; 4];
//! let mut reply = ReplyBuffer::new(&mut storage, 4)?;
//! session.receive_command(&mut reply)?;
//!
//! session.close()?;
//! # Ok::<(), pcd_core::PcdError>(())
//! ```

pub mod buffer;
mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod presence;
pub mod protocol;
pub mod registry;
mod reset;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use buffer::{CommandBuffer, ReplyBuffer};
pub use config::SessionConfig;
pub use error::{PcdError, Result, status_code};
pub use events::{NullObserver, PacketDirection, SessionEvent, SessionObserver, TracingObserver};
pub use presence::{ConnectStatus, check_connected};
pub use registry::{DeviceRegistry, RegistryLease};
pub use session::Session;
pub use transport::{
    Deadline, DeviceConnector, MockTransport, NusbConnector, NusbTransport, TransportError,
    UsbTransport,
};
