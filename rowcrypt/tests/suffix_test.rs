#![allow(clippy::unwrap_used)]

mod common;

use common::{factory_with, MutableMetastore, ORIGINAL_DATA, PARTITION_ID};
use rowcrypt::policy::CryptoPolicy;
use rowcrypt::session::Session;
use std::sync::Arc;

#[tokio::test]
async fn suffixed_session_decrypts_unsuffixed_records() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new());

    // Written before a region suffix was configured.
    let plain = factory.session(PARTITION_ID).await.unwrap();
    let drr = plain.encrypt(ORIGINAL_DATA).await.unwrap();

    let suffixed = factory
        .session_with_suffix(PARTITION_ID, "east")
        .await
        .unwrap();
    assert_eq!(suffixed.decrypt(&drr).await.unwrap(), ORIGINAL_DATA);
}

#[tokio::test]
async fn unsuffixed_session_decrypts_suffixed_records() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new());

    let suffixed = factory
        .session_with_suffix(PARTITION_ID, "east")
        .await
        .unwrap();
    let drr = suffixed.encrypt(ORIGINAL_DATA).await.unwrap();

    // The record carries suffixed key ids.
    assert!(drr
        .key
        .parent_key_meta
        .as_ref()
        .unwrap()
        .id
        .ends_with("_east"));

    let plain = factory.session(PARTITION_ID).await.unwrap();
    assert_eq!(plain.decrypt(&drr).await.unwrap(), ORIGINAL_DATA);
}

#[tokio::test]
async fn suffixed_records_stay_partition_bound() {
    let metastore = Arc::new(MutableMetastore::new());
    let factory = factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new());

    let suffixed = factory
        .session_with_suffix(PARTITION_ID, "east")
        .await
        .unwrap();
    let drr = suffixed.encrypt(ORIGINAL_DATA).await.unwrap();

    let foreign = factory.session("someoneelse").await.unwrap();
    assert!(matches!(
        foreign.decrypt(&drr).await,
        Err(rowcrypt::Error::MetadataMissing(_))
    ));
}
