//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use super::traits::{Deadline, DeviceConnector, TransportError, UsbTransport};

#[derive(Default)]
struct MockState {
    /// Queued replies to return on read.
    replies: VecDeque<Vec<u8>>,
    /// Captured writes.
    writes: Vec<Vec<u8>>,
    /// Whether device is "connected".
    connected: bool,
    /// Device accepts nothing and answers nothing.
    silent: bool,
    /// Device acknowledges reset requests.
    reset_ack: bool,
    resets: usize,
    releases: usize,
    /// One-shot failure for the next transfer or reset.
    next_error: Option<TransportError>,
    /// One-shot failure for the next presence query or connect.
    next_connect_error: Option<TransportError>,
    fail_release: bool,
    /// Another process holds the device.
    busy: bool,
}

/// Mock transport for unit testing session logic.
///
/// Clones share state, so a test can keep one handle while the session owns
/// another. The mock doubles as its own `DeviceConnector`.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: true,
                reset_ack: true,
                ..Default::default()
            })),
            vid: 0x1234,
            pid: 0x0400,
        }
    }

    /// Queue a reply to be returned on next read.
    ///
    /// Replies are delivered verbatim, even when longer or shorter than the
    /// length the reader asked for.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.state.lock().unwrap().replies.push_back(bytes.to_vec());
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.state.lock().unwrap().connected = true;
    }

    /// Stop answering: every transfer runs until its deadline.
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    /// Control whether reset requests are acknowledged.
    pub fn set_reset_ack(&self, ack: bool) {
        self.state.lock().unwrap().reset_ack = ack;
    }

    /// Fail the next transfer or reset with `err`.
    pub fn fail_next(&self, err: TransportError) {
        self.state.lock().unwrap().next_error = Some(err);
    }

    /// Fail the next presence query or connect with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        self.state.lock().unwrap().next_connect_error = Some(err);
    }

    /// Make `release` report a fault.
    pub fn set_fail_release(&self, fail: bool) {
        self.state.lock().unwrap().fail_release = fail;
    }

    /// Simulate another process holding the device.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().unwrap().busy = busy;
    }

    /// Number of acknowledged resets.
    pub fn reset_count(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    /// Number of times the handle was released.
    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    /// Common preamble of every transfer: connection, injected failure,
    /// then silence.
    fn begin(&self, deadline: Deadline) -> Result<(), TransportError> {
        let silent = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(TransportError::Disconnected);
            }
            if let Some(err) = state.next_error.take() {
                return Err(err);
            }
            state.silent
        };
        if silent {
            return Err(wait_out(deadline));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Block until the deadline passes and report the timeout.
fn wait_out(deadline: Deadline) -> TransportError {
    thread::sleep(deadline.remaining());
    deadline.timeout_error()
}

impl UsbTransport for MockTransport {
    fn transfer_out(&mut self, data: &[u8], deadline: Deadline) -> Result<usize, TransportError> {
        self.begin(deadline)?;
        self.state.lock().unwrap().writes.push(data.to_vec());
        Ok(data.len())
    }

    fn transfer_in(&mut self, _len: usize, deadline: Deadline) -> Result<Vec<u8>, TransportError> {
        self.begin(deadline)?;
        let reply = self.state.lock().unwrap().replies.pop_front();
        reply.ok_or_else(|| wait_out(deadline))
    }

    fn reset_target(&mut self, deadline: Deadline) -> Result<(), TransportError> {
        self.begin(deadline)?;
        let acked = {
            let mut state = self.state.lock().unwrap();
            if state.reset_ack {
                state.resets += 1;
                state.replies.clear();
            }
            state.reset_ack
        };
        if acked { Ok(()) } else { Err(wait_out(deadline)) }
    }

    fn release(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.releases += 1;
        if state.fail_release {
            return Err(TransportError::Fault("release failed".into()));
        }
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

impl DeviceConnector for MockTransport {
    type Transport = MockTransport;

    fn query_present(&self) -> Result<bool, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.next_connect_error.take() {
            return Err(err);
        }
        Ok(state.connected)
    }

    fn connect(&self) -> Result<MockTransport, TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.next_connect_error.take() {
            return Err(err);
        }
        if !state.connected {
            return Err(TransportError::DeviceNotFound {
                vid: self.vid,
                pid: self.pid,
            });
        }
        if state.busy {
            return Err(TransportError::Busy);
        }
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn soon() -> Deadline {
        Deadline::after(Duration::from_millis(50))
    }

    #[test]
    fn test_mock_reply_queue() {
        let mut mock = MockTransport::new();
        mock.queue_reply(&[1, 2, 3, 4]);
        mock.queue_reply(&[5, 6]);

        assert_eq!(mock.transfer_in(4, soon()).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mock.transfer_in(2, soon()).unwrap(), vec![5, 6]);

        // Queue is empty now
        assert!(matches!(
            mock.transfer_in(4, soon()),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        mock.transfer_out(b"Hello", soon()).unwrap();
        mock.transfer_out(b"World", soon()).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.query_present().unwrap());

        mock.disconnect();
        assert!(!mock.query_present().unwrap());
        assert!(matches!(
            mock.transfer_out(b"test", soon()),
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            mock.connect(),
            Err(TransportError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_mock_silent_waits_for_deadline() {
        let mut mock = MockTransport::new();
        mock.set_silent(true);

        let start = Instant::now();
        let res = mock.transfer_out(b"x", Deadline::after(Duration::from_millis(100)));
        assert!(matches!(res, Err(TransportError::Timeout { timeout_ms: 100 })));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_mock_fail_next_is_one_shot() {
        let mut mock = MockTransport::new();
        mock.fail_next(TransportError::Fault("stall".into()));

        assert!(matches!(
            mock.transfer_out(b"a", soon()),
            Err(TransportError::Fault(_))
        ));
        assert!(mock.transfer_out(b"a", soon()).is_ok());
    }

    #[test]
    fn test_mock_connect_fault_is_one_shot() {
        let mock = MockTransport::new();
        mock.fail_next_connect(TransportError::OpenFailed("usbfs".into()));

        assert!(matches!(mock.connect(), Err(TransportError::OpenFailed(_))));
        assert!(mock.connect().is_ok());

        mock.fail_next_connect(TransportError::Fault("enumeration".into()));
        assert!(matches!(mock.query_present(), Err(TransportError::Fault(_))));
        assert!(mock.query_present().unwrap());
    }

    #[test]
    fn test_mock_clones_share_state() {
        let mock = MockTransport::new();
        let mut opened = mock.connect().unwrap();
        opened.transfer_out(&[0xAA], soon()).unwrap();
        assert_eq!(mock.get_writes(), vec![vec![0xAA]]);
    }
}
