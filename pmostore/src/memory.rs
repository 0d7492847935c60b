//! Backend mémoire du blob store.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{BlobStore, StoreError};

/// Blob store en RAM.
///
/// Sert de backend de test et de shim pour les hôtes (navigateur) qui
/// fournissent leur propre persistance derrière la même interface.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nombre de blobs stockés.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.blobs.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
