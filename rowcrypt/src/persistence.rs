//! Function adapters for the [`Storer`] and [`Loader`] traits, so closures
//! can serve as persistence hooks without a named type.

use crate::envelope::DataRowRecord;
use crate::error::Result;
use crate::{Loader, Storer};

use async_trait::async_trait;
use std::marker::PhantomData;

/// Adapts a closure into a [`Loader`].
pub struct LoaderFn<K, F>
where
    F: for<'key> Fn(&'key K) -> Result<Option<DataRowRecord>> + Send + Sync,
    K: Send + Sync,
{
    f: F,
    _key_type: PhantomData<K>,
}

impl<K, F> LoaderFn<K, F>
where
    F: for<'key> Fn(&'key K) -> Result<Option<DataRowRecord>> + Send + Sync,
    K: Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _key_type: PhantomData,
        }
    }
}

#[async_trait]
impl<K, F> Loader for LoaderFn<K, F>
where
    F: for<'key> Fn(&'key K) -> Result<Option<DataRowRecord>> + Send + Sync,
    K: Send + Sync,
{
    type Key = K;

    async fn load(&self, key: &Self::Key) -> Result<Option<DataRowRecord>> {
        (self.f)(key)
    }
}

/// Adapts a closure into a [`Storer`].
pub struct StorerFn<K, F>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
    K: Send + Sync,
{
    f: F,
    _key_type: PhantomData<K>,
}

impl<K, F> StorerFn<K, F>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
    K: Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _key_type: PhantomData,
        }
    }
}

#[async_trait]
impl<K, F> Storer for StorerFn<K, F>
where
    F: Fn(&DataRowRecord) -> Result<K> + Send + Sync,
    K: Send + Sync,
{
    type Key = K;

    async fn store(&self, drr: &DataRowRecord) -> Result<Self::Key> {
        (self.f)(drr)
    }
}
