//! C ABI for the PCD400 USB driver session.
//!
//! Exposes the classic `PCD400_Usb*` entry points over the process-wide
//! device registry. Every function returns one of the `PCDUSB_ERROR_*`
//! codes and never unwinds across the boundary.
//!
//! The configuration is read from the TOML file named by the
//! `PCD400_CONFIG` environment variable, falling back to defaults.

#![allow(non_snake_case)]

use std::ffi::{c_int, c_void};
use std::panic::{self, UnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use pcd_core::{
    DeviceRegistry, NusbConnector, NusbTransport, PcdError, ReplyBuffer, Result, Session,
    SessionConfig, check_connected, status_code,
};
use tracing::{error, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PCD400_CONFIG";

static ACTIVE: Mutex<Option<Arc<Session<NusbTransport>>>> = Mutex::new(None);

fn active() -> MutexGuard<'static, Option<Arc<Session<NusbTransport>>>> {
    match ACTIVE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The open session, if any. The global slot is not held during transfers.
fn current() -> Result<Arc<Session<NusbTransport>>> {
    active()
        .as_ref()
        .filter(|s| s.is_open())
        .cloned()
        .ok_or(PcdError::NotOpen)
}

fn load_config() -> Result<SessionConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => SessionConfig::load_from_file(&path).map_err(|e| {
            warn!(error = %e, "Unusable config file");
            PcdError::Internal(format!("config: {e}"))
        }),
        None => Ok(SessionConfig::default()),
    }
}

/// Run an operation, converting its outcome and any panic into a code.
fn guarded<F>(op: F) -> c_int
where
    F: FnOnce() -> Result<()> + UnwindSafe,
{
    match panic::catch_unwind(op) {
        Ok(result) => status_code(&result),
        Err(_) => {
            error!("Panic inside PCD400 call");
            PcdError::Internal("panic".into()).code()
        }
    }
}

fn open() -> Result<()> {
    let mut slot = active();
    if slot.as_ref().is_some_and(|s| s.is_open()) {
        return Err(PcdError::Locked);
    }
    let config = load_config()?;
    let session = Session::open_configured(&DeviceRegistry::global(), &config)?;
    *slot = Some(Arc::new(session));
    Ok(())
}

fn close() -> Result<()> {
    let session = active().take().ok_or(PcdError::NotOpen)?;
    session.close()
}

#[unsafe(no_mangle)]
pub extern "system" fn PCD400_UsbOpen() -> c_int {
    guarded(open)
}

#[unsafe(no_mangle)]
pub extern "system" fn PCD400_UsbClose() -> c_int {
    guarded(close)
}

#[unsafe(no_mangle)]
pub extern "system" fn PCD400_UsbSetTimeOut(time_out: u16) -> c_int {
    guarded(move || current()?.set_timeout(u32::from(time_out)))
}

/// Write 1 (connected) or 0 (not connected) to `connect`.
///
/// # Safety
///
/// `connect` must be null or valid for a `u16` write.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn PCD400_UsbConnectCheck(connect: *mut u16) -> c_int {
    guarded(move || {
        if connect.is_null() {
            return Err(PcdError::InvalidArgument("null connect pointer".into()));
        }
        let config = load_config()?;
        let status = check_connected(&NusbConnector::from_config(&config))?;
        // SAFETY: non-null, and the caller guarantees it is writable.
        unsafe { connect.write(status.as_word()) };
        Ok(())
    })
}

/// Send `send_byte` bytes starting at `send_cmd`.
///
/// # Safety
///
/// `send_cmd` must be null or valid for reads of `send_byte` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn PCD400_UsbSendCmd(send_byte: u32, send_cmd: *const c_void) -> c_int {
    guarded(move || {
        let session = current()?;
        if send_cmd.is_null() || send_byte == 0 {
            return Err(PcdError::InvalidArgument("empty command".into()));
        }
        // SAFETY: non-null, and the caller guarantees `send_byte` readable bytes.
        let data = unsafe { std::slice::from_raw_parts(send_cmd.cast::<u8>(), send_byte as usize) };
        session.send(data)
    })
}

/// Receive exactly `receive_size` bytes into `receive_cmd`.
///
/// # Safety
///
/// `receive_cmd` must be null or valid for writes of `receive_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn PCD400_UsbReceiveCmd(
    receive_cmd: *mut c_void,
    receive_size: u32,
) -> c_int {
    guarded(move || {
        let session = current()?;
        if receive_cmd.is_null() {
            return Err(PcdError::InvalidArgument("null reply pointer".into()));
        }
        let len = receive_size as usize;
        // SAFETY: non-null, and the caller guarantees `receive_size` writable bytes.
        let region = unsafe { std::slice::from_raw_parts_mut(receive_cmd.cast::<u8>(), len) };
        let mut reply = ReplyBuffer::new(region, len)?;
        session.receive_command(&mut reply).map(|_| ())
    })
}

#[unsafe(no_mangle)]
pub extern "system" fn PCD400_UsbTargetReset() -> c_int {
    guarded(|| current()?.target_reset())
}
