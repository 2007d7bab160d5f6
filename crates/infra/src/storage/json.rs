use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::r#trait::{LockToken, StoreError, Storer};

/// Typed JSON access on top of a raw [`Storer`].
///
/// Every higher-level persistence operation is built from these four calls.
#[derive(Clone)]
pub struct JsonStorer {
    inner: Arc<dyn Storer>,
}

impl JsonStorer {
    pub fn new(inner: Arc<dyn Storer>) -> Self {
        Self { inner }
    }

    /// Serialize `value` and write it under `key`.
    pub async fn put<T>(&self, key: &str, value: &T, lock: LockToken) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_string(value).map_err(|e| StoreError::Codec(e.to_string()))?;
        self.inner.put(key, json, lock).await
    }

    /// Read and decode the value under `key`, with the token to write it back.
    pub async fn get<T>(&self, key: &str) -> Result<(T, LockToken), StoreError>
    where
        T: DeserializeOwned,
    {
        let (raw, lock) = self.inner.get(key).await?;
        let value = serde_json::from_str(&raw).map_err(|e| StoreError::Codec(e.to_string()))?;
        Ok((value, lock))
    }

    pub async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.del(key).await
    }

    pub async fn keys(&self, suffix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(suffix).await
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

impl std::fmt::Debug for JsonStorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStorer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::storage::InMemoryStorer;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    fn storer() -> JsonStorer {
        JsonStorer::new(Arc::new(InMemoryStorer::new()))
    }

    #[tokio::test]
    async fn values_round_trip_with_a_writable_token() {
        let db = storer();
        let record = Record {
            name: "a".into(),
            count: 1,
        };
        db.put("k", &record, LockToken::NoLock).await.unwrap();

        let (read, lock): (Record, _) = db.get("k").await.unwrap();
        assert_eq!(read, record);

        db.put("k", &Record { count: 2, ..read }, lock).await.unwrap();
        assert_eq!(
            db.put("k", &record, lock).await,
            Err(StoreError::StaleData),
            "the token is spent once the key moves on"
        );
    }

    #[tokio::test]
    async fn undecodable_values_are_codec_errors() {
        let raw = Arc::new(InMemoryStorer::new());
        raw.put("k", "not json".into(), LockToken::NoLock).await.unwrap();
        let db = JsonStorer::new(raw);

        let err = db.get::<Record>("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }

    #[tokio::test]
    async fn missing_keys_are_reported_with_the_key() {
        let db = storer();
        let err = db.get::<Record>("nope").await.unwrap_err();
        assert_eq!(err, StoreError::KeyNotFound("nope".into()));
        assert_eq!(err.to_string(), "key not found: nope");
    }
}
