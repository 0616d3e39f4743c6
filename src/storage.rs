//! Persistent key-value storage used to remember generated context keys.
use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;

use crate::{Error, Result};

/// Minimal async key-value storage. Implementations may be backed by memory, disk or a
/// platform-native store.
///
/// Access is not serialized by callers: if two writers must not interleave, the backend has to
/// provide that guarantee.
#[async_trait]
pub trait PersistentStorage: Send + Sync {
    /// Read a value. `Ok(None)` if the key is not set.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// [`PersistentStorage`] that keeps values in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        InMemoryStorage::default()
    }
}

#[async_trait]
impl PersistentStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        // Constructing new value before requesting the lock to minimize lock span.
        let (key, value) = (key.to_owned(), value.to_owned());

        let mut values = self
            .values
            .write()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        values.insert(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{InMemoryStorage, PersistentStorage};

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.get("a").await.unwrap(), None);

        storage.set("a", "1").await.unwrap();
        storage.set("a", "2").await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(storage.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn can_set_from_another_task() {
        let storage = Arc::new(InMemoryStorage::new());

        {
            let storage = storage.clone();
            tokio::spawn(async move { storage.set("k", "v").await.unwrap() })
                .await
                .unwrap();
        }

        assert_eq!(storage.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
