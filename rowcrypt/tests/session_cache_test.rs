#![allow(clippy::unwrap_used)]

mod common;

use common::{factory_with, MutableMetastore, ORIGINAL_DATA, PARTITION_ID};
use rowcrypt::policy::CryptoPolicy;
use rowcrypt::session::Session;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn cached_sessions_are_shared() {
    let metastore = Arc::new(MutableMetastore::new());
    let policy = CryptoPolicy::new().with_session_cache();
    let factory = factory_with(Arc::clone(&metastore) as _, policy);

    let first = factory.session(PARTITION_ID).await.unwrap();
    let second = factory.session(PARTITION_ID).await.unwrap();

    // Same underlying session, two leases.
    assert!(Arc::ptr_eq(&first, &second));

    let drr = first.encrypt(ORIGINAL_DATA).await.unwrap();
    assert_eq!(second.decrypt(&drr).await.unwrap(), ORIGINAL_DATA);

    first.close().await.unwrap();
    second.close().await.unwrap();
    factory.close().await.unwrap();
}

#[tokio::test]
async fn uncached_factories_build_fresh_sessions() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new());

    let first = factory.session(PARTITION_ID).await.unwrap();
    let second = factory.session(PARTITION_ID).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn idle_sessions_are_evicted_after_duration() {
    let metastore = Arc::new(MutableMetastore::new());
    let policy = CryptoPolicy::new()
        .with_session_cache()
        .with_session_cache_duration(Duration::from_millis(50));
    let factory = factory_with(Arc::clone(&metastore) as _, policy);

    let first = factory.session(PARTITION_ID).await.unwrap();
    first.close().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The idle session expired; the factory builds a replacement.
    let second = factory.session(PARTITION_ID).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));

    // The replacement still round-trips against the shared metastore.
    let drr = second.encrypt(ORIGINAL_DATA).await.unwrap();
    assert_eq!(second.decrypt(&drr).await.unwrap(), ORIGINAL_DATA);

    second.close().await.unwrap();
    factory.close().await.unwrap();
}

#[tokio::test]
async fn cache_capacity_bounds_live_sessions() {
    let metastore = Arc::new(MutableMetastore::new());
    let policy = CryptoPolicy::new()
        .with_session_cache()
        .with_session_cache_max_size(2);
    let factory = factory_with(Arc::clone(&metastore) as _, policy);

    // Fill the cache and release the leases so eviction can proceed.
    for id in ["p1", "p2", "p3"] {
        let session = factory.session(id).await.unwrap();
        session.encrypt(b"warm").await.unwrap();
        session.close().await.unwrap();
    }

    // Still fully functional for every partition afterwards.
    for id in ["p1", "p2", "p3"] {
        let session = factory.session(id).await.unwrap();
        let drr = session.encrypt(ORIGINAL_DATA).await.unwrap();
        assert_eq!(session.decrypt(&drr).await.unwrap(), ORIGINAL_DATA);
        session.close().await.unwrap();
    }

    factory.close().await.unwrap();
}
