use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

use super::{StorageError, StorageProvider, SweepableStorage};
use crate::config::RetryConfig;
use crate::hash::Key;

/// Retries transient failures of the wrapped provider with capped
///  exponential backoff. Every other error is returned on first sight.
#[derive(Debug, Clone)]
pub struct RetryingStorage<S> {
    inner: S,
    policy: RetryConfig,
}

impl<S> RetryingStorage<S> {
    pub fn new(inner: S, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, op: &'static str, key: Option<&Key>, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        op,
                        key = ?key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient storage failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl<S: StorageProvider> StorageProvider for RetryingStorage<S> {
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<bool, StorageError> {
        self.run("put", Some(key), || self.inner.put(key, bytes.clone()))
            .await
    }

    async fn get(&self, key: &Key) -> Result<Bytes, StorageError> {
        self.run("get", Some(key), || self.inner.get(key)).await
    }

    async fn has(&self, key: &Key) -> Result<bool, StorageError> {
        self.run("has", Some(key), || self.inner.has(key)).await
    }
}

#[async_trait]
impl<S: SweepableStorage> SweepableStorage for RetryingStorage<S> {
    async fn list_keys(&self, after: Option<Key>, limit: usize) -> Result<Vec<Key>, StorageError> {
        self.run("list", None, || self.inner.list_keys(after, limit))
            .await
    }

    async fn delete(&self, key: &Key) -> Result<bool, StorageError> {
        self.run("delete", Some(key), || self.inner.delete(key)).await
    }
}
