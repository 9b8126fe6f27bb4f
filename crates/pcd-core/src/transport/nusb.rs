//! nusb-based USB transport implementation.
//!
//! Transfers are submitted to the endpoint queue and reaped with a bounded
//! `wait_next_complete`, so no call outlives its deadline. Expired transfers
//! are cancelled before returning.

use std::time::Duration;

use nusb::transfer::{
    Bulk, ControlOut, ControlType, Direction, In, Out, Recipient, TransferError as UsbError,
};
use nusb::{DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{Deadline, DeviceConnector, TransportError, UsbTransport};
use crate::config::SessionConfig;

/// Time allowed for a cancelled transfer to be reaped.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Finds and opens the configured device with nusb.
#[derive(Debug, Clone)]
pub struct NusbConnector {
    vid: u16,
    pid: u16,
    interface: u8,
    reset_request: u8,
}

impl NusbConnector {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            interface: crate::protocol::DEFAULT_INTERFACE,
            reset_request: crate::protocol::VENDOR_REQUEST_TARGET_RESET,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            vid: config.vendor_id,
            pid: config.product_id,
            interface: config.interface,
            reset_request: config.reset_request,
        }
    }

    fn matches(&self, info: &DeviceInfo) -> bool {
        info.vendor_id() == self.vid && info.product_id() == self.pid
    }

    fn find(&self) -> Result<Option<DeviceInfo>, TransportError> {
        let mut devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        Ok(devices.find(|d| self.matches(d)))
    }
}

impl DeviceConnector for NusbConnector {
    type Transport = NusbTransport;

    fn query_present(&self) -> Result<bool, TransportError> {
        Ok(self.find()?.is_some())
    }

    #[instrument(level = "info", fields(vid = format!("{:04X}", self.vid), pid = format!("{:04X}", self.pid)))]
    fn connect(&self) -> Result<NusbTransport, TransportError> {
        let device_info = self.find()?.ok_or(TransportError::DeviceNotFound {
            vid: self.vid,
            pid: self.pid,
        })?;
        NusbTransport::open_device_info(device_info, self.interface, self.reset_request)
    }
}

/// nusb-based USB transport.
pub struct NusbTransport {
    /// Claimed interface; `None` once released.
    interface: Option<Interface>,
    interface_number: u8,
    in_endpoint: u8,
    out_endpoint: u8,
    reset_request: u8,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    fn open_device_info(
        device_info: DeviceInfo,
        interface_number: u8,
        reset_request: u8,
    ) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found device"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        let interface = device.claim_interface(interface_number).wait().map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: interface_number,
                message: e.to_string(),
            }
        })?;

        // Find BULK endpoints
        let mut in_endpoint: u8 = 0;
        let mut out_endpoint: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == interface_number {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == Direction::In {
                                    in_endpoint = ep.address();
                                } else {
                                    out_endpoint = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_endpoint == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        info!(
            in_ep = %format!("0x{:02X}", in_endpoint),
            out_ep = %format!("0x{:02X}", out_endpoint),
            "Device opened successfully"
        );

        Ok(Self {
            interface: Some(interface),
            interface_number,
            in_endpoint,
            out_endpoint,
            reset_request,
            vid,
            pid,
        })
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface
            .as_ref()
            .ok_or_else(|| TransportError::Fault("interface already released".into()))
    }
}

/// Translate a completed transfer's status, treating a cancellation after
/// expiry as the timeout it is.
fn map_transfer_error(err: UsbError, deadline: &Deadline) -> TransportError {
    match err {
        UsbError::Disconnected => TransportError::Disconnected,
        UsbError::Cancelled if deadline.is_expired() => deadline.timeout_error(),
        other => TransportError::Fault(other.to_string()),
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data, deadline), fields(len = data.len()))]
    fn transfer_out(&mut self, data: &[u8], deadline: Deadline) -> Result<usize, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Bulk, Out>(self.out_endpoint)
            .map_err(|e| TransportError::Fault(e.to_string()))?;

        let mut buf = ep.allocate(data.len());
        buf.extend_from_slice(data);
        ep.submit(buf);

        let Some(completion) = ep.wait_next_complete(deadline.remaining()) else {
            warn!("Write did not complete before deadline, cancelling");
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_GRACE);
            return Err(deadline.timeout_error());
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, &deadline))?;

        debug!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(skip(self, deadline))]
    fn transfer_in(&mut self, len: usize, deadline: Deadline) -> Result<Vec<u8>, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Bulk, In>(self.in_endpoint)
            .map_err(|e| TransportError::Fault(e.to_string()))?;

        // IN requests must be a whole number of packets.
        let packet = ep.max_packet_size().max(1);
        let request_len = len.div_ceil(packet).max(1) * packet;
        let mut buf = ep.allocate(request_len);
        buf.set_requested_len(request_len);
        ep.submit(buf);

        let Some(completion) = ep.wait_next_complete(deadline.remaining()) else {
            warn!("Read did not complete before deadline, cancelling");
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_GRACE);
            return Err(deadline.timeout_error());
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, &deadline))?;

        let n = completion.actual_len.min(completion.buffer.len());
        debug!(bytes_read = n, "Read complete");
        Ok(completion.buffer[..n].to_vec())
    }

    #[instrument(skip(self, deadline), fields(request = self.reset_request))]
    fn reset_target(&mut self, deadline: Deadline) -> Result<(), TransportError> {
        if deadline.is_expired() {
            return Err(deadline.timeout_error());
        }
        let request = ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Interface,
            request: self.reset_request,
            value: 0,
            index: u16::from(self.interface_number),
            data: &[],
        };
        self.interface()?
            .control_out(request, deadline.remaining())
            .wait()
            .map_err(|e| map_transfer_error(e, &deadline))?;

        debug!("Reset acknowledged");
        Ok(())
    }

    fn release(&mut self) -> Result<(), TransportError> {
        // Dropping the interface releases the claim.
        match self.interface.take() {
            Some(interface) => {
                drop(interface);
                debug!(interface = self.interface_number, "Interface released");
                Ok(())
            }
            None => Err(TransportError::Fault("interface already released".into())),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
