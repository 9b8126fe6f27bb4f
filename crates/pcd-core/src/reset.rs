//! Target reset primitive.
//!
//! Policy: fire the reset directive, then wait until the deadline for the
//! transport-level acknowledgment (completion of the request). No
//! device-specific handshake is assumed. A timeout leaves the target in an
//! unknown state and is not safe to retry blindly.

use tracing::{info, warn};

use crate::error::Result;
use crate::transport::{Deadline, UsbTransport};

pub(crate) fn target_reset<T: UsbTransport>(link: &mut T, deadline: Deadline) -> Result<()> {
    match link.reset_target(deadline) {
        Ok(()) => {
            info!(
                vid = %format!("{:04X}", link.vendor_id()),
                pid = %format!("{:04X}", link.product_id()),
                "Target reset acknowledged"
            );
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Target reset not acknowledged; device state unknown");
            Err(e.into())
        }
    }
}
