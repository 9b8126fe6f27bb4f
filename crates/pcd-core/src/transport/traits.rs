//! USB Transport capability.
//!
//! Defines the `UsbTransport` and `DeviceConnector` traits the session
//! delegates to, allowing different implementations (nusb, mock, etc.).

use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Device is claimed by another process")]
    Busy,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transfer fault: {0}")]
    Fault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point in time by which a transfer must complete.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// The full budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Timeout error describing this deadline.
    pub fn timeout_error(&self) -> TransportError {
        TransportError::Timeout {
            timeout_ms: self.budget.as_millis() as u64,
        }
    }
}

/// An opened device handle.
///
/// Every transfer is bounded by the supplied deadline; an implementation
/// must return `TransportError::Timeout` rather than block past it.
pub trait UsbTransport: Send {
    /// Write raw bytes to the OUT endpoint.
    fn transfer_out(&mut self, data: &[u8], deadline: Deadline) -> Result<usize, TransportError>;

    /// Read up to `len` bytes from the IN endpoint.
    fn transfer_in(&mut self, len: usize, deadline: Deadline) -> Result<Vec<u8>, TransportError>;

    /// Issue a target reset and wait for the transport-level acknowledgment.
    fn reset_target(&mut self, deadline: Deadline) -> Result<(), TransportError>;

    /// Give the handle back to the OS.
    fn release(&mut self) -> Result<(), TransportError>;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}

/// Enumeration side of the transport: finds and opens devices.
pub trait DeviceConnector: Send + Sync {
    type Transport: UsbTransport;

    /// Check whether a matching device is enumerated right now.
    fn query_present(&self) -> Result<bool, TransportError>;

    /// Open and claim the matching device.
    fn connect(&self) -> Result<Self::Transport, TransportError>;
}
