//! End-to-end session behavior against the mock transport.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use pcd_core::{
    CommandBuffer, ConnectStatus, DeviceRegistry, MockTransport, NullObserver, PcdError,
    ReplyBuffer, Session, TransportError, check_connected, status_code,
};

fn open(registry: &Arc<DeviceRegistry>, mock: &MockTransport) -> Result<Session<MockTransport>, PcdError> {
    Session::open_with(registry, mock, 5, Arc::new(NullObserver))
}

#[test]
fn test_command_round_trip() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    mock.queue_reply(&[0x10, 0x20, 0x30, 0x40]);

    let session = open(&registry, &mock).unwrap();
    assert_eq!(status_code(&session.set_timeout(5)), 0);

    let data = [0x01, 0x02];
    let cmd = CommandBuffer::new(&data, 2).unwrap();
    assert_eq!(status_code(&session.send_command(&cmd)), 0);
    assert_eq!(mock.get_writes(), vec![vec![0x01, 0x02]]);

    let mut storage = [0u8; 64];
    let mut reply = ReplyBuffer::new(&mut storage, 4).unwrap();
    assert_eq!(session.receive_command(&mut reply).unwrap(), 4);
    assert_eq!(reply.filled(), &[0x10, 0x20, 0x30, 0x40]);

    assert_eq!(status_code(&session.close()), 0);
    assert!(!registry.is_open());
}

#[test]
fn test_second_open_is_locked() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();

    let first = open(&registry, &mock).unwrap();
    let second = open(&registry, &mock);
    assert!(matches!(second, Err(PcdError::Locked)));

    // The failed open must not disturb the live session.
    first.send(&[0x55]).unwrap();
    first.close().unwrap();
}

#[test]
fn test_concurrent_opens_admit_exactly_one() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let mock = mock.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                open(&registry, &mock).map(|s| {
                    // Hold the session until every thread has tried.
                    thread::sleep(Duration::from_millis(200));
                    s
                })
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let opened = results.iter().filter(|r| r.is_ok()).count();
    let locked = results
        .iter()
        .filter(|r| matches!(r, Err(PcdError::Locked)))
        .count();
    assert_eq!(opened, 1);
    assert_eq!(locked, 3);
}

#[test]
fn test_double_close_then_reopen() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();

    let session = open(&registry, &mock).unwrap();
    assert!(session.close().is_ok());
    assert_eq!(session.close(), Err(PcdError::NotOpen));
    assert_eq!(mock.release_count(), 1);

    let again = open(&registry, &mock).unwrap();
    assert!(again.is_open());
    again.close().unwrap();
}

#[test]
fn test_invalid_timeout_keeps_previous_value() {
    let registry = Arc::new(DeviceRegistry::new());
    let session = open(&registry, &MockTransport::new()).unwrap();
    session.set_timeout(9).unwrap();

    for bad in [0, 61, 3600] {
        let res = session.set_timeout(bad);
        assert_eq!(status_code(&res), -2);
        assert_eq!(session.timeout_secs(), 9);
    }
}

#[test]
fn test_silent_device_times_out_at_configured_bound() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = open(&registry, &mock).unwrap();
    session.set_timeout(1).unwrap();
    mock.set_silent(true);

    let start = Instant::now();
    let res = session.send(&[0x01]);
    let elapsed = start.elapsed();

    assert!(matches!(res, Err(PcdError::Timeout { timeout_ms: 1000 })));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "overshoot: {elapsed:?}");
    assert!(session.is_open());
}

#[test]
fn test_unacknowledged_reset_then_close() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = open(&registry, &mock).unwrap();
    session.set_timeout(1).unwrap();
    mock.set_reset_ack(false);

    let start = Instant::now();
    let res = session.target_reset();
    assert_eq!(status_code(&res), -101);
    assert!(start.elapsed() >= Duration::from_secs(1));

    assert!(session.close().is_ok());
    assert!(!registry.is_open());
}

#[test]
fn test_presence_without_session() {
    let mock = MockTransport::new();
    mock.disconnect();

    let status = check_connected(&mock).unwrap();
    assert_eq!(status, ConnectStatus::NotConnected);

    mock.reconnect();
    assert!(check_connected(&mock).unwrap().is_connected());
}

#[test]
fn test_device_loss_mid_session() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = open(&registry, &mock).unwrap();

    mock.disconnect();
    assert_eq!(session.send(&[1]), Err(PcdError::NoDevice));

    let mut storage = [0u8; 2];
    let mut reply = ReplyBuffer::new(&mut storage, 2).unwrap();
    assert_eq!(session.receive_command(&mut reply), Err(PcdError::NoDevice));

    session.close().unwrap();
    assert!(matches!(open(&registry, &mock), Err(PcdError::NoDevice)));
    assert!(!registry.is_open());
}

#[test]
fn test_close_during_transfer_releases_lock() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = Arc::new(open(&registry, &mock).unwrap());
    session.set_timeout(1).unwrap();
    mock.set_silent(true);

    let sender = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send(&[0xEE]))
    };
    thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    assert!(session.close().is_ok());
    // Bounded by the transfer timeout plus the close grace period.
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!registry.is_open());

    let res = sender.join().unwrap();
    assert!(matches!(res, Err(PcdError::Timeout { .. })));
    assert_eq!(mock.release_count(), 1);
    assert_eq!(session.send(&[0xEE]), Err(PcdError::NotOpen));
}

#[test]
fn test_queued_send_shares_timeout_bound() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = Arc::new(open(&registry, &mock).unwrap());
    session.set_timeout(1).unwrap();
    mock.set_silent(true);

    let first = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send(&[0x01]))
    };
    thread::sleep(Duration::from_millis(50));

    // Waiting behind the first transfer counts against the second's timeout.
    let start = Instant::now();
    let res = session.send(&[0x02]);
    let elapsed = start.elapsed();
    assert!(matches!(res, Err(PcdError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(900), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned after {elapsed:?}");

    assert!(matches!(first.join().unwrap(), Err(PcdError::Timeout { .. })));
    session.close().unwrap();
}

#[test]
fn test_release_fault_during_transfer_reported_by_close() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = Arc::new(open(&registry, &mock).unwrap());
    session.set_timeout(1).unwrap();
    mock.set_silent(true);
    mock.set_fail_release(true);

    let sender = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.send(&[0xEE]))
    };
    thread::sleep(Duration::from_millis(100));

    assert!(matches!(session.close(), Err(PcdError::Internal(_))));
    assert!(!registry.is_open());

    assert!(matches!(sender.join().unwrap(), Err(PcdError::Timeout { .. })));
    assert_eq!(mock.release_count(), 1);
    assert_eq!(session.close(), Err(PcdError::NotOpen));
}

#[test]
fn test_connect_fault_leaves_registry_closed() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    mock.fail_next_connect(TransportError::OpenFailed("permission denied".into()));

    assert!(matches!(open(&registry, &mock), Err(PcdError::Internal(_))));
    assert!(!registry.is_open());

    mock.fail_next_connect(TransportError::Fault("enumeration failed".into()));
    let err = check_connected(&mock).unwrap_err();
    assert!(matches!(err, PcdError::Internal(_)));
    assert_ne!(err, PcdError::NotOpen);

    let session = open(&registry, &mock).unwrap();
    assert_eq!(check_connected(&mock).unwrap(), ConnectStatus::Connected);
    session.close().unwrap();
}

#[test]
fn test_transfers_are_serialized() {
    let registry = Arc::new(DeviceRegistry::new());
    let mock = MockTransport::new();
    let session = Arc::new(open(&registry, &mock).unwrap());

    let handles: Vec<_> = (0u8..8)
        .map(|i| {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send(&[i, i]))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    let mut writes = mock.get_writes();
    writes.sort();
    let expected: Vec<Vec<u8>> = (0u8..8).map(|i| vec![i, i]).collect();
    assert_eq!(writes, expected);
}
