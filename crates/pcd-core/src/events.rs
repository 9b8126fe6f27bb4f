//! Event system for UI decoupling.
//!
//! Lets front-ends observe session activity without tight coupling to the
//! driver logic.

use std::fmt;

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Exclusive session opened on a device.
    Opened { vid: u16, pid: u16 },
    /// Session closed and lock released.
    Closed,
    /// Transfer timeout changed.
    TimeoutChanged { secs: u32 },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        preview: Vec<u8>,
    },
    /// Target reset acknowledged.
    Reset,
    /// Operation failed with a result code.
    TransferFailed { code: i32, message: String },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait SessionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &SessionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Opened { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Session opened");
            }
            SessionEvent::Closed => {
                tracing::info!("Session closed");
            }
            SessionEvent::TimeoutChanged { secs } => {
                tracing::debug!(secs, "Timeout changed");
            }
            SessionEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "USB Packet");
            }
            SessionEvent::Reset => {
                tracing::info!("Target reset");
            }
            SessionEvent::TransferFailed { code, message } => {
                tracing::warn!(code, "Operation failed: {}", message);
            }
        }
    }
}
