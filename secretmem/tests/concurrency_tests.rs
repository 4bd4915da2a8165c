#![allow(clippy::unwrap_used)]

use secretmem::{ProtectedSecret, Secret, SecretExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn concurrent_readers_share_access() {
    let secret = ProtectedSecret::new(b"shared between threads").unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let secret = secret.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..100 {
                secret
                    .with_bytes(|bytes| {
                        assert_eq!(bytes, b"shared between threads");
                        Ok(())
                    })
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Protection cycled back to no-access after the last reader.
    secret.with_bytes(|_| Ok(())).unwrap();
}

#[test]
fn close_waits_for_in_flight_access() {
    let secret = ProtectedSecret::new(b"slow reader").unwrap();
    let reader_done = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();

    let reader = {
        let secret = secret.clone();
        let reader_done = Arc::clone(&reader_done);
        thread::spawn(move || {
            secret
                .with_bytes(|bytes| {
                    assert_eq!(bytes, b"slow reader");
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    reader_done.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        })
    };

    // Wait until the reader is inside its access scope.
    entered_rx.recv().unwrap();

    // Close must block until the reader has left its scope.
    secret.close().unwrap();
    assert!(reader_done.load(Ordering::SeqCst));
    assert!(secret.is_closed());

    reader.join().unwrap();
}

#[test]
fn access_after_concurrent_close_fails() {
    let secret = ProtectedSecret::new(b"closing soon").unwrap();

    let closer = {
        let secret = secret.clone();
        thread::spawn(move || {
            secret.close().unwrap();
        })
    };
    closer.join().unwrap();

    assert!(secret.with_bytes(|_| Ok(())).is_err());
}

#[test]
fn clones_share_one_backing_secret() {
    let secret = ProtectedSecret::new(b"one backing store").unwrap();
    let clone = secret.clone();

    secret.close().unwrap();

    // The clone observes the close because both handles share the pages.
    assert!(clone.is_closed());
    assert!(clone.with_bytes(|_| Ok(())).is_err());
}
