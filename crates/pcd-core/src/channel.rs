//! Command channel: exact-framing send and receive over a transport.
//!
//! Send and receive are independent calls. Pairing commands with replies is
//! left to the caller, since some device functions never answer.

use tracing::{debug, warn};

use crate::buffer::{CommandBuffer, ReplyBuffer};
use crate::error::{PcdError, Result};
use crate::transport::{Deadline, UsbTransport};

/// Transmit every byte of `cmd` before the deadline.
///
/// A short write is a failed transfer, reported as a timeout.
pub(crate) fn send<T: UsbTransport>(
    link: &mut T,
    cmd: &CommandBuffer<'_>,
    deadline: Deadline,
) -> Result<()> {
    let written = link.transfer_out(cmd.as_bytes(), deadline)?;
    if written != cmd.len() {
        warn!(written, expected = cmd.len(), "Short write");
        return Err(PcdError::from(deadline.timeout_error()));
    }
    debug!(len = written, "Command sent");
    Ok(())
}

/// Receive exactly `reply.expected()` bytes before the deadline.
///
/// Fewer bytes count as a failed transfer (timeout). More bytes than
/// requested means the transport broke its contract (internal error).
/// On any failure the reply is left empty.
pub(crate) fn receive<T: UsbTransport>(
    link: &mut T,
    reply: &mut ReplyBuffer<'_>,
    deadline: Deadline,
) -> Result<usize> {
    reply.clear();
    let expected = reply.expected();
    let data = link.transfer_in(expected, deadline)?;

    if data.len() < expected {
        warn!(received = data.len(), expected, "Short reply");
        return Err(PcdError::from(deadline.timeout_error()));
    }
    if data.len() > expected {
        return Err(PcdError::Internal(format!(
            "transport returned {} bytes for a {}-byte reply",
            data.len(),
            expected
        )));
    }

    reply.fill(&data);
    debug!(len = expected, "Reply received");
    Ok(expected)
}
