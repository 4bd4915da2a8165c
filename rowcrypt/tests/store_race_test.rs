#![allow(clippy::unwrap_used)]

mod common;

use async_trait::async_trait;
use common::{factory_with, intermediate_key_id, MutableMetastore, PARTITION_ID};
use rowcrypt::envelope::EnvelopeKeyRecord;
use rowcrypt::policy::CryptoPolicy;
use rowcrypt::session::Session;
use rowcrypt::{Metastore, Result};
use std::sync::Arc;
use std::time::Duration;

/// Delays intermediate key stores long enough that two racing factories
/// both reach their generation path before either store lands.
#[derive(Debug)]
struct SlowStoreMetastore {
    inner: Arc<MutableMetastore>,
    store_delay: Duration,
}

#[async_trait]
impl Metastore for SlowStoreMetastore {
    async fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        self.inner.load(id, created).await
    }

    async fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        self.inner.load_latest(id).await
    }

    async fn store(&self, id: &str, created: i64, envelope: &EnvelopeKeyRecord) -> Result<bool> {
        if id.starts_with("_IK_") {
            tokio::time::sleep(self.store_delay).await;
        }
        self.inner.store(id, created, envelope).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_store_loser_adopts_winner() {
    let backing = Arc::new(MutableMetastore::new());
    let metastore = Arc::new(SlowStoreMetastore {
        inner: Arc::clone(&backing),
        store_delay: Duration::from_millis(100),
    });

    // Two independent factories (separate caches) over the same store; the
    // default one-minute timestamp precision makes both generations compute
    // the same created, so exactly one store can win.
    let left = Arc::new(factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new()));
    let right = Arc::new(factory_with(Arc::clone(&metastore) as _, CryptoPolicy::new()));

    let left_task = {
        let left = Arc::clone(&left);
        tokio::spawn(async move {
            let session = left.session(PARTITION_ID).await.unwrap();
            session.encrypt(b"from left").await.unwrap()
        })
    };
    let right_task = {
        let right = Arc::clone(&right);
        tokio::spawn(async move {
            let session = right.session(PARTITION_ID).await.unwrap();
            session.encrypt(b"from right").await.unwrap()
        })
    };

    let left_drr = left_task.await.unwrap();
    let right_drr = right_task.await.unwrap();

    // Exactly one intermediate key version exists and both records
    // reference it: the loser wiped its own key and adopted the winner's.
    let versions = backing.versions(&intermediate_key_id());
    assert_eq!(versions.len(), 1);
    assert_eq!(
        left_drr.key.parent_key_meta.as_ref().unwrap().created,
        versions[0]
    );
    assert_eq!(
        right_drr.key.parent_key_meta.as_ref().unwrap().created,
        versions[0]
    );

    // Cross-decryption proves both ended up with identical key material.
    let left_session = left.session(PARTITION_ID).await.unwrap();
    assert_eq!(
        left_session.decrypt(&right_drr).await.unwrap(),
        b"from right"
    );
    let right_session = right.session(PARTITION_ID).await.unwrap();
    assert_eq!(right_session.decrypt(&left_drr).await.unwrap(), b"from left");
}
