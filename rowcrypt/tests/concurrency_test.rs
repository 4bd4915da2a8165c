#![allow(clippy::unwrap_used)]

mod common;

use common::{factory_with, intermediate_key_id, system_key_id, MutableMetastore, PARTITION_ID};
use rowcrypt::policy::CryptoPolicy;
use rowcrypt::session::Session;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_encrypts_materialize_one_intermediate_key() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = Arc::new(factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new()));
    let session = factory.session(PARTITION_ID).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            session.encrypt(b"x").await.unwrap()
        }));
    }

    let records: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    // Exactly one intermediate key and one system key were stored.
    let ik_versions = metastore.versions(&intermediate_key_id());
    assert_eq!(ik_versions.len(), 1);
    assert_eq!(metastore.versions(&system_key_id()).len(), 1);

    // Every record references the stored key and decrypts.
    for drr in &records {
        let parent = drr.key.parent_key_meta.as_ref().unwrap();
        assert_eq!(parent.id, intermediate_key_id());
        assert_eq!(parent.created, ik_versions[0]);
        assert_eq!(session.decrypt(drr).await.unwrap(), b"x");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sessions_share_stored_keys() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = Arc::new(factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new()));

    // Separate sessions (and so separate per-session IK caches) racing on
    // the same fresh partition.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let factory = Arc::clone(&factory);
        handles.push(tokio::spawn(async move {
            let session = factory.session(PARTITION_ID).await.unwrap();
            session.encrypt(b"y").await.unwrap()
        }));
    }

    let records: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let ik_versions = metastore.versions(&intermediate_key_id());
    assert_eq!(ik_versions.len(), 1);

    let session = factory.session(PARTITION_ID).await.unwrap();
    for drr in &records {
        assert_eq!(drr.key.parent_key_meta.as_ref().unwrap().created, ik_versions[0]);
        assert_eq!(session.decrypt(drr).await.unwrap(), b"y");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn shared_intermediate_key_cache_serves_all_sessions() {
    let metastore = Arc::new(MutableMetastore::new());
    let policy = CryptoPolicy::new().with_shared_intermediate_key_cache(100);
    let factory = Arc::new(factory_with(Arc::clone(&metastore) as _, policy));

    let mut handles = Vec::new();
    for i in 0..16 {
        let factory = Arc::clone(&factory);
        handles.push(tokio::spawn(async move {
            let session = factory.session(PARTITION_ID).await.unwrap();
            let drr = session.encrypt(format!("row {}", i).as_bytes()).await.unwrap();
            let decrypted = session.decrypt(&drr).await.unwrap();
            assert_eq!(decrypted, format!("row {}", i).as_bytes());
        }));
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    assert_eq!(metastore.versions(&intermediate_key_id()).len(), 1);
    factory.close().await.unwrap();
}
