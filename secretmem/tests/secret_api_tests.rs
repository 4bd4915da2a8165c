#![allow(clippy::unwrap_used)]

use secretmem::{Secret, SecretExt, SecretFactory};
use secretmem::protected::ProtectedSecretFactory;
use std::io::Read;

fn factory() -> ProtectedSecretFactory {
    ProtectedSecretFactory::new()
}

#[test]
fn trait_object_round_trip() {
    let mut data = b"behind a trait object".to_vec();
    let secret: Box<dyn Secret> = factory().new_secret(&mut data).unwrap();

    assert_eq!(secret.len(), 21);
    assert!(!secret.is_empty());

    secret
        .with_bytes(|bytes| {
            assert_eq!(bytes, b"behind a trait object");
            Ok(())
        })
        .unwrap();

    secret.close().unwrap();
    assert!(secret.is_closed());
}

#[test]
fn with_bytes_func_wipes_transient_buffer() {
    let mut data = b"transform me".to_vec();
    let secret = factory().new_secret(&mut data).unwrap();

    let hex = secret
        .with_bytes_func(|bytes| {
            let transient = bytes.to_vec();
            let rendered = transient.iter().map(|b| format!("{:02x}", b)).collect::<String>();
            Ok((rendered, transient))
        })
        .unwrap();

    assert_eq!(hex.len(), 2 * "transform me".len());
}

#[test]
fn matches_bytes_is_exact() {
    let mut data = b"compare me".to_vec();
    let secret = factory().new_secret(&mut data).unwrap();

    assert!(secret.matches_bytes(b"compare me").unwrap());
    assert!(!secret.matches_bytes(b"compare mE").unwrap());
    assert!(!secret.matches_bytes(b"compare").unwrap());
}

#[test]
fn error_propagates_out_of_access_scope() {
    let mut data = b"failing closure".to_vec();
    let secret = factory().new_secret(&mut data).unwrap();

    let result: secretmem::Result<()> = secret.with_bytes(|_| {
        Err(secretmem::SecretError::OperationFailed("boom".to_string()))
    });
    assert!(result.is_err());

    // Protection was restored despite the error.
    secret.with_bytes(|_| Ok(())).unwrap();
}

#[test]
fn reader_reads_in_chunks() {
    let mut data = (0u8..64).collect::<Vec<_>>();
    let secret = factory().new_secret(&mut data).unwrap();

    let mut reader = secret.reader().unwrap();
    let mut buf = [0u8; 10];
    let mut collected = Vec::new();
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }

    assert_eq!(collected, (0u8..64).collect::<Vec<_>>());
}
