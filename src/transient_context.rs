//! Assigns keys to transient (anonymous) contexts.
//!
//! A context record without a key is only valid if it is marked transient. Such records get a
//! generated key that is persisted per kind, so the same device keeps presenting the same
//! identity across sessions.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::future::try_join_all;
use uuid::Uuid;

use crate::{
    context::{Context, ContextKind, ContextRecord},
    storage::PersistentStorage,
    Error, Result,
};

/// Source of identifiers for transient contexts.
pub trait IdGenerator: Send + Sync {
    /// Produce a new globally unique identifier.
    fn generate(&self) -> String;
}

impl<F: Fn() -> String + Send + Sync> IdGenerator for F {
    fn generate(&self) -> String {
        self()
    }
}

/// Generates time-based (version 1) UUIDs.
#[derive(Debug, Clone)]
pub struct UuidV1Generator {
    node_id: [u8; 6],
}

impl UuidV1Generator {
    /// Create a generator with a random node id.
    pub fn new() -> UuidV1Generator {
        let mut node_id: [u8; 6] = rand::random();
        // Multicast bit marks the node id as random rather than a MAC address.
        node_id[0] |= 0x01;
        UuidV1Generator { node_id }
    }
}

impl Default for UuidV1Generator {
    fn default() -> Self {
        UuidV1Generator::new()
    }
}

impl IdGenerator for UuidV1Generator {
    fn generate(&self) -> String {
        Uuid::now_v1(&self.node_id).to_string()
    }
}

/// Fills in keys of transient contexts, generating and persisting them when needed.
///
/// Resolutions of the same kind through one processor are serialized, so they observe each
/// other's persisted key. Separate processors sharing a storage (or separate processes) are only
/// protected by the read-before-write order: two resolutions racing at the write may still
/// persist different keys, and the last write wins.
pub struct TransientContextProcessor {
    storage: Arc<dyn PersistentStorage>,
    id_generator: Box<dyn IdGenerator>,
    kind_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransientContextProcessor {
    /// Create a processor that persists generated keys in `storage`.
    pub fn new(storage: Arc<dyn PersistentStorage>) -> TransientContextProcessor {
        TransientContextProcessor {
            storage,
            id_generator: Box::new(UuidV1Generator::new()),
            kind_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the identifier generator.
    pub fn with_id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    /// Process a context, returning a copy in which every record has a string key.
    ///
    /// The input is never modified.
    ///
    /// # Errors
    ///
    /// - [`Error::ContextNotSpecified`] if `context` is `None`.
    /// - [`Error::InvalidContext`] if any record has no key and is not marked transient. For
    ///   multi-kind contexts, the first failing record wins.
    pub async fn process_context(&self, context: Option<&Context>) -> Result<Context> {
        let Some(context) = context else {
            return Err(Error::ContextNotSpecified);
        };

        let mut processed = context.clone();
        match &mut processed {
            Context::Single(single) => {
                let kind = ContextKind::from_kind(single.kind.as_deref());
                self.process_single_kind(kind, &mut single.record).await?;
            }
            Context::Multi(multi) => {
                try_join_all(multi.records_mut().map(|(kind, record)| {
                    self.process_single_kind(ContextKind::from_kind(Some(kind)), record)
                }))
                .await?;
            }
        }

        Ok(processed)
    }

    /// Process a single-kind context, or one record of a multi-kind context.
    async fn process_single_kind(
        &self,
        kind: ContextKind<'_>,
        record: &mut ContextRecord,
    ) -> Result<()> {
        // A key always wins, even on a transient record.
        if record.coerce_key() {
            return Ok(());
        }

        if !record.is_transient(kind) {
            log::debug!(target: "ld_common", kind = kind.name(); "context has no key and is not transient");
            return Err(Error::missing_key());
        }

        let storage_key = kind.storage_key();
        let lock = self.kind_lock(&storage_key);
        let key = {
            let _guard = lock.lock().await;
            self.cached_or_generated_key(kind, &storage_key).await
        };
        self.release_kind_lock(&storage_key, lock);

        record.set_key(key);
        Ok(())
    }

    async fn cached_or_generated_key(&self, kind: ContextKind<'_>, storage_key: &str) -> String {
        if let Some(key) = self.cached_key(storage_key).await {
            return key;
        }

        let key = self.id_generator.generate();
        log::trace!(target: "ld_common", kind = kind.name(), key = key.as_str(); "generated transient context key");
        // Persist before resolving, so the next resolution of this kind sees it.
        self.store_key(storage_key, &key).await;
        key
    }

    async fn cached_key(&self, storage_key: &str) -> Option<String> {
        match self.storage.get(storage_key).await {
            Ok(key) => key.filter(|key| !key.is_empty()),
            Err(err) => {
                // Treat as a miss. A fresh key is still a valid identity.
                log::warn!(target: "ld_common", storage_key; "failed to read cached context key: {:?}", err);
                None
            }
        }
    }

    async fn store_key(&self, storage_key: &str, key: &str) {
        if let Err(err) = self.storage.set(storage_key, key).await {
            log::warn!(target: "ld_common", storage_key; "failed to persist context key: {:?}", err);
        }
    }

    fn kind_lock(&self, storage_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .kind_locks
            .lock()
            .expect("thread holding kind locks should not panic");
        locks.entry(storage_key.to_owned()).or_default().clone()
    }

    /// Drop our handle on a kind lock, removing the entry once no other resolution holds it.
    fn release_kind_lock(&self, storage_key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .kind_locks
            .lock()
            .expect("thread holding kind locks should not panic");
        drop(lock);
        // Handles are only cloned under `kind_locks`, so a count of 1 cannot grow behind us.
        if locks
            .get(storage_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(storage_key);
        }
    }
}
