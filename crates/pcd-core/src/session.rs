//! PCD Session - the exclusive, open device handle.
//!
//! A session exists only between a successful open and close. It owns the
//! transport handle, the registry lease and the active timeout, and
//! serializes transfers so only one is in flight at a time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::buffer::{CommandBuffer, ReplyBuffer};
use crate::channel;
use crate::config::SessionConfig;
use crate::error::{PcdError, Result};
use crate::events::{PacketDirection, SessionEvent, SessionObserver, TracingObserver};
use crate::protocol::*;
use crate::registry::{DeviceRegistry, RegistryLease};
use crate::reset;
use crate::transport::{Deadline, DeviceConnector, NusbConnector, NusbTransport, UsbTransport};

/// Slack granted to close beyond the active timeout.
const CLOSE_GRACE: Duration = Duration::from_secs(1);
const CLOSE_POLL: Duration = Duration::from_millis(10);
const LINK_POLL: Duration = Duration::from_millis(5);

fn validate_timeout(seconds: u32) -> Result<()> {
    if (PCDUSB_TMO_MIN..=PCDUSB_TMO_MAX).contains(&seconds) {
        Ok(())
    } else {
        Err(PcdError::invalid(format!(
            "timeout {seconds}s outside {PCDUSB_TMO_MIN}..={PCDUSB_TMO_MAX}"
        )))
    }
}

pub struct Session<T: UsbTransport> {
    /// Transport handle; `None` once released.
    link: Mutex<Option<T>>,
    lease: Mutex<Option<RegistryLease>>,
    /// Fault from a release done by an in-flight transfer during close.
    release_fault: Mutex<Option<PcdError>>,
    timeout_secs: AtomicU32,
    closed: AtomicBool,
    observer: Arc<dyn SessionObserver>,
    vid: u16,
    pid: u16,
}

impl Session<NusbTransport> {
    /// Open the configured device with the nusb backend.
    pub fn open_configured(registry: &Arc<DeviceRegistry>, config: &SessionConfig) -> Result<Self> {
        Self::open_with(
            registry,
            &NusbConnector::from_config(config),
            config.default_timeout_secs,
            Arc::new(TracingObserver),
        )
    }
}

impl<T: UsbTransport> Session<T> {
    /// Open a session with the default timeout and a tracing observer.
    pub fn open<C>(registry: &Arc<DeviceRegistry>, connector: &C) -> Result<Self>
    where
        C: DeviceConnector<Transport = T>,
    {
        Self::open_with(
            registry,
            connector,
            PCDUSB_TMO_DEFAULT,
            Arc::new(TracingObserver),
        )
    }

    /// Acquire the registry, then connect. A failure at either step leaves
    /// the registry closed.
    #[instrument(skip(registry, connector, observer))]
    pub fn open_with<C>(
        registry: &Arc<DeviceRegistry>,
        connector: &C,
        timeout_secs: u32,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<Self>
    where
        C: DeviceConnector<Transport = T>,
    {
        validate_timeout(timeout_secs)?;
        let lease = registry.acquire()?;

        let link = match connector.connect() {
            Ok(link) => link,
            Err(e) => {
                let err = PcdError::from(e);
                warn!(error = %err, "Open failed");
                // Dropping the lease closes the registry again.
                drop(lease);
                return Err(err);
            }
        };

        let (vid, pid) = (link.vendor_id(), link.product_id());
        let session = Self {
            link: Mutex::new(Some(link)),
            lease: Mutex::new(Some(lease)),
            release_fault: Mutex::new(None),
            timeout_secs: AtomicU32::new(timeout_secs),
            closed: AtomicBool::new(false),
            observer,
            vid,
            pid,
        };
        session.emit(SessionEvent::Opened { vid, pid });
        Ok(session)
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs.load(Ordering::SeqCst)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_secs()))
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(PcdError::NotOpen)
        }
    }

    /// Change the bound for subsequent transfers. A transfer already in
    /// flight keeps the deadline it started with.
    pub fn set_timeout(&self, seconds: u32) -> Result<()> {
        self.ensure_open()?;
        validate_timeout(seconds)?;
        self.timeout_secs.store(seconds, Ordering::SeqCst);
        self.emit(SessionEvent::TimeoutChanged { secs: seconds });
        Ok(())
    }

    /// Transmit a framed command. Blocks until written, timed out or failed.
    #[instrument(skip(self, cmd), fields(len = cmd.len()))]
    pub fn send_command(&self, cmd: &CommandBuffer<'_>) -> Result<()> {
        self.with_link(|link, deadline| channel::send(link, cmd, deadline))?;
        self.emit_packet(PacketDirection::Tx, cmd.as_bytes());
        Ok(())
    }

    /// Transmit all of `data`.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.send_command(&CommandBuffer::from_slice(data)?)
    }

    /// Receive exactly `reply.expected()` bytes.
    #[instrument(skip(self, reply), fields(expected = reply.expected()))]
    pub fn receive_command(&self, reply: &mut ReplyBuffer<'_>) -> Result<usize> {
        let n = self.with_link(|link, deadline| channel::receive(link, reply, deadline))?;
        self.emit_packet(PacketDirection::Rx, reply.filled());
        Ok(n)
    }

    /// Fire a target reset and wait, up to the active timeout, for the
    /// transport to acknowledge it.
    #[instrument(skip(self))]
    pub fn target_reset(&self) -> Result<()> {
        self.with_link(reset::target_reset::<T>)?;
        self.emit(SessionEvent::Reset);
        Ok(())
    }

    fn emit_packet(&self, direction: PacketDirection, data: &[u8]) {
        self.emit(SessionEvent::Packet {
            direction,
            length: data.len(),
            preview: data.iter().take(PACKET_PREVIEW_LEN).copied().collect(),
        });
    }

    /// Run one transfer with exclusive access to the transport.
    ///
    /// The deadline starts before the transport is acquired, so time spent
    /// queued behind another transfer counts against the same bound.
    fn with_link<R>(&self, op: impl FnOnce(&mut T, Deadline) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        let deadline = Deadline::after(self.timeout());
        let mut guard = loop {
            match self.link.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::Poisoned(_)) => {
                    return Err(PcdError::Internal("session transport poisoned".into()));
                }
                Err(TryLockError::WouldBlock) if !deadline.is_expired() => {
                    thread::sleep(LINK_POLL.min(deadline.remaining()));
                }
                Err(TryLockError::WouldBlock) => {
                    debug!("Transport busy until deadline");
                    let err = PcdError::from(deadline.timeout_error());
                    self.emit_failure(&err);
                    return Err(err);
                }
            }
        };
        let Some(link) = guard.as_mut() else {
            return Err(PcdError::NotOpen);
        };

        let result = op(link, deadline);

        // Close is waiting on this transfer; release on its behalf and leave
        // any fault for close to report.
        if !self.is_open()
            && let Some(mut link) = guard.take()
            && let Err(e) = link.release()
        {
            warn!(error = %e, "Deferred transport release failed");
            self.store_release_fault(PcdError::from(e));
        }
        drop(guard);

        if let Err(e) = &result {
            self.emit_failure(e);
        }
        result
    }

    fn emit_failure(&self, err: &PcdError) {
        self.emit(SessionEvent::TransferFailed {
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn store_release_fault(&self, err: PcdError) {
        match self.release_fault.lock() {
            Ok(mut slot) => *slot = Some(err),
            Err(poisoned) => *poisoned.into_inner() = Some(err),
        }
    }

    fn take_release_fault(&self) -> Option<PcdError> {
        match self.release_fault.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Close the session and release the exclusive lock.
    ///
    /// The lock is released even when releasing the transport fails; that
    /// fault is still returned. A second close reports `NotOpen`. If a
    /// transfer is in flight, close waits at most the active timeout plus a
    /// short grace period before leaving the release to that transfer.
    #[instrument(skip(self))]
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Close on a closed session");
            return Err(PcdError::NotOpen);
        }

        let released = self.release_link();

        let lease = match self.lease.lock() {
            Ok(mut l) => l.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(lease) = lease {
            lease.release();
        }

        self.emit(SessionEvent::Closed);
        debug!(
            vid = %format!("{:04X}", self.vid),
            pid = %format!("{:04X}", self.pid),
            "Session closed"
        );
        released
    }

    fn release_link(&self) -> Result<()> {
        let give_up = Instant::now() + self.timeout() + CLOSE_GRACE;
        loop {
            let taken = match self.link.try_lock() {
                Ok(mut guard) => guard.take(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
                Err(TryLockError::WouldBlock) if Instant::now() < give_up => {
                    thread::sleep(CLOSE_POLL);
                    continue;
                }
                Err(TryLockError::WouldBlock) => {
                    warn!("Transfer still in flight; transport released when it returns");
                    return Ok(());
                }
            };
            return match taken {
                Some(mut link) => link.release().map_err(|e| {
                    let err = PcdError::from(e);
                    self.emit_failure(&err);
                    err
                }),
                // Released by the transfer that held it.
                None => self.take_release_fault().map_or(Ok(()), Err),
            };
        }
    }
}

impl<T: UsbTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.is_open()
            && let Err(e) = self.close()
        {
            warn!(error = %e, "Close on drop reported a fault");
        }
    }
}
