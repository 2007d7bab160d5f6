use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Version of a stored value, as observed by a read and required by a write.
///
/// A write succeeds only when the token still matches the key's current
/// version in the store. This is the only concurrency primitive the broker
/// relies on; there are no in-process locks around instance or job data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockToken {
    /// Skip the compare-and-swap check (unconditional write).
    NoLock,
    /// The key must not exist (create-only write).
    Absent,
    /// The key must still be at this revision.
    Revision(u64),
}

impl LockToken {
    /// Whether a key currently at `current` (`None` = absent) accepts a write
    /// holding this token.
    pub fn matches(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (LockToken::NoLock, _) => true,
            (LockToken::Absent, None) => true,
            (LockToken::Revision(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

/// Key/value store operation error.
///
/// `KeyNotFound` and `StaleData` are part of the [`Storer`] contract: callers
/// branch on them, so every backend must report them with these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("data is stale; updated since last get")]
    StaleData,

    #[error("json codec error: {0}")]
    Codec(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }

    pub fn is_stale_data(&self) -> bool {
        matches!(self, StoreError::StaleData)
    }
}

/// Raw key/value store with single-key compare-and-swap.
///
/// Backends (an in-memory map for tests/dev, a coordination service in
/// production) only need per-key CAS; cross-key atomicity is never assumed.
///
/// ## Contract
///
/// - `get` returns the value and a [`LockToken::Revision`] for it, or
///   `KeyNotFound(key)`.
/// - `put` writes when the supplied token matches (see [`LockToken`]) and
///   fails with `StaleData` otherwise.
/// - `del` removes the key, or fails with `KeyNotFound(key)`.
/// - `keys` lists every key ending with `suffix`.
#[async_trait]
pub trait Storer: Send + Sync {
    async fn get(&self, key: &str) -> Result<(String, LockToken), StoreError>;

    async fn put(&self, key: &str, value: String, lock: LockToken) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn keys(&self, suffix: &str) -> Result<Vec<String>, StoreError>;

    /// Release backend resources.
    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> Storer for Arc<S>
where
    S: Storer + ?Sized,
{
    async fn get(&self, key: &str) -> Result<(String, LockToken), StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: String, lock: LockToken) -> Result<(), StoreError> {
        (**self).put(key, value, lock).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        (**self).del(key).await
    }

    async fn keys(&self, suffix: &str) -> Result<Vec<String>, StoreError> {
        (**self).keys(suffix).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}
