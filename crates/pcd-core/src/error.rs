//! Error taxonomy shared by every session operation.
//!
//! Each variant maps to exactly one integer result code so that callers
//! across the C ABI and in Rust observe the same outcomes.

use thiserror::Error;

use crate::protocol::*;
use crate::transport::TransportError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcdError {
    #[error("No session is open")]
    NotOpen,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device is locked by another session")]
    Locked,

    #[error("No target device present")]
    NoDevice,

    #[error("Transfer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PcdError>;

impl PcdError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PcdError::InvalidArgument(message.into())
    }

    /// Integer result code for this error.
    pub fn code(&self) -> i32 {
        match self {
            PcdError::NotOpen => PCDUSB_ERROR_NOT_OPEN,
            PcdError::InvalidArgument(_) => PCDUSB_ERROR_PARAM,
            PcdError::Locked => PCDUSB_ERROR_LOCKED,
            PcdError::NoDevice => PCDUSB_ERROR_NO_TARGET,
            PcdError::Timeout { .. } => PCDUSB_ERROR_TRANS,
            PcdError::Internal(_) => PCDUSB_ERROR_EXCEPTION,
        }
    }

    /// Rebuild an error from a non-zero result code.
    ///
    /// Returns `None` for success and for codes outside the taxonomy.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            PCDUSB_ERROR_NOT_OPEN => PcdError::NotOpen,
            PCDUSB_ERROR_PARAM => PcdError::invalid("reported by device layer"),
            PCDUSB_ERROR_LOCKED => PcdError::Locked,
            PCDUSB_ERROR_NO_TARGET => PcdError::NoDevice,
            PCDUSB_ERROR_TRANS => PcdError::Timeout { timeout_ms: 0 },
            PCDUSB_ERROR_EXCEPTION => PcdError::Internal("reported by device layer".into()),
            _ => return None,
        };
        Some(err)
    }

    /// True when the device may be left in an unknown state.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PcdError::Timeout { .. })
    }
}

impl From<TransportError> for PcdError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DeviceNotFound { .. } | TransportError::Disconnected => {
                PcdError::NoDevice
            }
            TransportError::Busy => PcdError::Locked,
            TransportError::Timeout { timeout_ms } => PcdError::Timeout { timeout_ms },
            other => PcdError::Internal(other.to_string()),
        }
    }
}

/// Collapse an operation outcome into its integer result code.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => PCDUSB_ERROR_NONE,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_table() {
        assert_eq!(PcdError::NotOpen.code(), -1);
        assert_eq!(PcdError::invalid("x").code(), -2);
        assert_eq!(PcdError::Locked.code(), -3);
        assert_eq!(PcdError::NoDevice.code(), -100);
        assert_eq!(PcdError::Timeout { timeout_ms: 1000 }.code(), -101);
        assert_eq!(PcdError::Internal("boom".into()).code(), -102);
    }

    #[test]
    fn test_from_code_inverts_code() {
        for code in [-1, -2, -3, -100, -101, -102] {
            let err = PcdError::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert!(PcdError::from_code(0).is_none());
        assert!(PcdError::from_code(-7).is_none());
    }

    #[test]
    fn test_transport_error_translation() {
        let nf = TransportError::DeviceNotFound { vid: 1, pid: 2 };
        assert_eq!(PcdError::from(nf), PcdError::NoDevice);
        assert_eq!(PcdError::from(TransportError::Disconnected), PcdError::NoDevice);
        assert_eq!(PcdError::from(TransportError::Busy), PcdError::Locked);
        assert_eq!(
            PcdError::from(TransportError::Timeout { timeout_ms: 2000 }),
            PcdError::Timeout { timeout_ms: 2000 }
        );
        let fault = PcdError::from(TransportError::Fault("stall".into()));
        assert_eq!(fault.code(), PCDUSB_ERROR_EXCEPTION);
    }

    #[test]
    fn test_status_code() {
        let ok: Result<()> = Ok(());
        assert_eq!(status_code(&ok), 0);
        let err: Result<()> = Err(PcdError::Locked);
        assert_eq!(status_code(&err), -3);
    }
}
