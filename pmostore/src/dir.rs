//! Backend disque du blob store : un fichier par clé.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BlobStore, StoreError};

/// Blob store sur disque, un fichier par clé sous un répertoire racine.
///
/// Les clés sont assainies en noms de fichiers : tout caractère hors
/// `[A-Za-z0-9._-]` est remplacé par `_`.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Ouvre (et crée au besoin) le répertoire racine.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{sanitized}.blob"))
    }
}

#[async_trait]
impl BlobStore for DirStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.file_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.file_for(key);
        tracing::debug!(key, bytes = data.len(), "writing blob to {:?}", path);
        tokio::fs::write(path, &data).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.file_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dir_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path()).unwrap();

        store
            .set("pmoedit-data-42", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let read = store.get("pmoedit-data-42").await.unwrap().unwrap();
        assert_eq!(read.as_ref(), b"payload");

        store.remove("pmoedit-data-42").await.unwrap();
        assert!(store.get("pmoedit-data-42").await.unwrap().is_none());
        store.remove("pmoedit-data-42").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path()).unwrap();

        store
            .set("weird/key with:stuff", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(store.get("weird/key with:stuff").await.unwrap().is_some());
        // Le fichier vit bien sous la racine, pas dans un sous-répertoire.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
