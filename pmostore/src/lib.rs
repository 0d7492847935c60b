//! # pmostore - Interface de stockage de blobs
//!
//! Cette crate définit la frontière avec le magasin clé/valeur persistant
//! utilisé par le cœur d'édition : un simple `get`/`set`/`remove` par clé
//! textuelle, consommé comme un blob store adressé par contenu.
//!
//! ## Architecture
//!
//! ```text
//! pmostore
//!     ├── BlobStore     - trait async get/set/remove
//!     ├── MemoryStore   - backend RAM (tests, shims navigateur)
//!     ├── DirStore      - backend disque (un fichier par clé)
//!     └── StoreKeys     - dérivation des clés <prefix>-data-<id>, etc.
//! ```
//!
//! Le backend est responsable de sérialiser ses écritures par clé ; les
//! implémentations fournies ici le garantissent trivialement.

mod dir;
mod keys;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;

pub use dir::DirStore;
pub use keys::StoreKeys;
pub use memory::MemoryStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("blob store backend failure: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Magasin de blobs clé/valeur, consommé par le cœur d'édition.
///
/// Contrat : `get` d'une clé absente retourne `Ok(None)` ; `remove` d'une
/// clé absente est un succès silencieux.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;
    async fn set(&self, key: &str, data: Bytes) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
