//! Presence monitor.
//!
//! Presence is independent of session ownership: it needs no registry lock
//! and never reports `NotOpen`.

use std::fmt;

use tracing::{debug, instrument};

use crate::error::{PcdError, Result};
use crate::protocol::{PCDUSB_CONNECTED, PCDUSB_NOT_CONNECTED};
use crate::transport::{DeviceConnector, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    NotConnected,
}

impl ConnectStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectStatus::Connected)
    }

    /// Word written through the C ABI.
    pub fn as_word(&self) -> u16 {
        match self {
            ConnectStatus::Connected => PCDUSB_CONNECTED,
            ConnectStatus::NotConnected => PCDUSB_NOT_CONNECTED,
        }
    }
}

impl From<bool> for ConnectStatus {
    fn from(present: bool) -> Self {
        if present {
            ConnectStatus::Connected
        } else {
            ConnectStatus::NotConnected
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStatus::Connected => write!(f, "connected"),
            ConnectStatus::NotConnected => write!(f, "not connected"),
        }
    }
}

/// Ask the transport whether a matching device is enumerated.
#[instrument(level = "debug", skip(connector))]
pub fn check_connected<C: DeviceConnector>(connector: &C) -> Result<ConnectStatus> {
    let status = match connector.query_present() {
        Ok(present) => ConnectStatus::from(present),
        Err(TransportError::DeviceNotFound { .. } | TransportError::Disconnected) => {
            ConnectStatus::NotConnected
        }
        Err(e) => return Err(PcdError::Internal(e.to_string())),
    };
    debug!(%status, "Presence checked");
    Ok(status)
}
