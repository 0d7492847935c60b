//! Segment : l'unité de stockage audio d'une piste.
//!
//! Un segment détient soit un buffer brut en mémoire (état `Hot`), soit
//! rien du tout, son contenu vivant compressé dans le blob store (état
//! `Cold`). Le passage d'un état à l'autre est piloté par le protocole
//! open/close refcounté de [`Track`](crate::Track) ; la recompression en
//! arrière-plan est observable via le handle conservé sur le nœud.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pmopcm::StreamSpec;

use crate::TimelineError;

/// Index d'un nœud dans l'arène de l'arbre.
pub(crate) type NodeId = usize;

/// Handle de la tâche de compression d'arrière-plan d'un segment.
pub(crate) type CompressionHandle = tokio::task::JoinHandle<Result<(), TimelineError>>;

/// Record persisté d'un segment (clé `<prefix>-seg-<id>`).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SegmentRecord {
    pub len: u64,
}

/// Contenu en mémoire d'un segment.
pub(crate) enum SegmentPayload {
    /// Pas de buffer brut : le contenu vit compressé dans le store.
    Cold,
    /// Buffer brut matérialisé, `capacity * bytes_per_frame` octets, partagé
    /// par tous les lecteurs ouverts.
    Hot(Vec<u8>),
}

/// Nœud de l'arbre de timeline.
///
/// `pos` est la longueur totale du sous-arbre gauche dans la forme courante
/// de l'arbre ; il n'est jamais persisté, le rééquilibrage le recalcule.
pub(crate) struct Segment {
    pub id: Uuid,
    pub pos: u64,
    pub len: u64,
    /// Capacité en frames, fixée à l'allocation. Un segment ne grandit
    /// jamais : plein, il est clos et un frère prend la suite.
    pub capacity: u64,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    /// Lien non possédant, utilisé uniquement pour la traversée montante.
    pub parent: Option<NodeId>,
    pub readers: u32,
    pub modified: bool,
    pub payload: SegmentPayload,
    /// Waveform rendue, cache mémoire du blob `<prefix>-wave-<id>`.
    pub waveform: Option<Bytes>,
    pub compression: Option<CompressionHandle>,
}

impl Segment {
    /// Réserve un segment neuf : buffer zéroé de `capacity` frames.
    pub fn allocate(spec: &StreamSpec, capacity: u64) -> Result<Self, TimelineError> {
        spec.validate()
            .map_err(|e| TimelineError::UnsupportedFormat(e.to_string()))?;
        assert!(capacity > 0, "segment capacity must be at least one frame");
        let bytes = capacity as usize * spec.bytes_per_frame();
        Ok(Self {
            id: Uuid::new_v4(),
            pos: 0,
            len: 0,
            capacity,
            left: None,
            right: None,
            parent: None,
            readers: 0,
            modified: false,
            payload: SegmentPayload::Hot(vec![0u8; bytes]),
            waveform: None,
            compression: None,
        })
    }

    /// Segment restauré depuis ses métadonnées persistées, sans buffer.
    pub fn cold(id: Uuid, len: u64, capacity: u64) -> Self {
        Self {
            id,
            pos: 0,
            len,
            capacity,
            left: None,
            right: None,
            parent: None,
            readers: 0,
            modified: false,
            payload: SegmentPayload::Cold,
            waveform: None,
            compression: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    #[cfg(test)]
    pub fn for_test(len: u64) -> Self {
        Self::cold(Uuid::new_v4(), len, len.max(1))
    }
}

/// Instantané public d'un segment, pour l'inspection et les tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: Uuid,
    pub len: u64,
    pub capacity: u64,
}
