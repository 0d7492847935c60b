//! Flux de lecture d'une piste.
//!
//! Machine à états : `start → (reading)* → closed`. Chaque pas ouvre le
//! segment courant, en découpe la sous-plage utile, l'émet, puis avance au
//! successeur in-order via les liens parents — il n'y a pas d'index ambiant
//! dans l'arbre.

use async_trait::async_trait;

use pmocodec::CodecEngine;
use pmopcm::{PcmChunk, PcmError, PcmStream, StreamSpec};

use crate::{segment::NodeId, track::Track, TimelineError};

/// Lecteur pull sur une plage de piste.
///
/// Emprunte la piste exclusivement le temps du flux ; le consommateur peut
/// s'arrêter de tirer à tout moment. En mode `keep_open`, chaque segment
/// produit reste ouvert jusqu'à [`close_open_segments`](Self::close_open_segments) —
/// un consommateur annulé qui oublie de refermer laisse fuir le compteur de
/// lecteurs, il n'y a pas de finaliseur automatique.
pub struct TrackReader<'a, E: CodecEngine + 'static> {
    track: &'a mut Track<E>,
    cursor: Option<(NodeId, u64)>,
    remaining: u64,
    keep_open: bool,
    open_nodes: Vec<NodeId>,
}

impl<'a, E: CodecEngine + 'static> TrackReader<'a, E> {
    pub(crate) fn new(
        track: &'a mut Track<E>,
        cursor: Option<(NodeId, u64)>,
        remaining: u64,
        keep_open: bool,
    ) -> Self {
        Self {
            track,
            cursor,
            remaining,
            keep_open,
            open_nodes: Vec::new(),
        }
    }

    /// Tire le prochain chunk ; `None` quand la plage demandée ou l'arbre
    /// est épuisé, au premier des deux.
    pub async fn pull(&mut self) -> Result<Option<PcmChunk>, TimelineError> {
        loop {
            if self.remaining == 0 {
                return Ok(None);
            }
            let Some((node, local)) = self.cursor else {
                return Ok(None);
            };
            let seg_len = self.track.tree().node(node).len;
            if local >= seg_len {
                // Segment vide (len 0) ou curseur en bout : avancer.
                self.cursor = self.track.tree().successor(node).map(|n| (n, 0));
                continue;
            }

            self.track.open_segment(node).await?;
            let take = (seg_len - local).min(self.remaining);
            let chunk = self.track.slice_segment(node, local, take)?;
            if self.keep_open {
                self.open_nodes.push(node);
            } else {
                self.track.close_segment(node, false);
            }

            self.remaining -= take;
            self.cursor = if local + take < seg_len {
                Some((node, local + take))
            } else {
                self.track.tree().successor(node).map(|n| (n, 0))
            };
            return Ok(Some(chunk));
        }
    }

    /// Referme tous les segments laissés ouverts par le mode `keep_open`.
    pub fn close_open_segments(&mut self) {
        for node in self.open_nodes.drain(..) {
            self.track.close_segment(node, false);
        }
    }

    /// Collecte tout le flux restant en un seul vecteur d'octets.
    pub async fn collect_bytes(&mut self) -> Result<Vec<u8>, TimelineError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.pull().await? {
            out.extend_from_slice(chunk.data());
        }
        Ok(out)
    }
}

#[async_trait]
impl<E: CodecEngine + 'static> PcmStream for TrackReader<'_, E> {
    fn spec(&self) -> StreamSpec {
        self.track.spec()
    }

    async fn next_chunk(&mut self) -> Result<Option<PcmChunk>, PcmError> {
        self.pull().await.map_err(|e| PcmError::Source(e.to_string()))
    }
}
