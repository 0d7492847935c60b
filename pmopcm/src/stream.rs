//! Protocole de flux PCM pull.
//!
//! Un [`PcmStream`] est une séquence asynchrone de chunks tirée par le
//! consommateur. Le wrapper [`PushbackStream`] ajoute l'opération non
//! standard `push_back` : rendre au flux ce qui n'a pas été consommé, pour
//! qu'il soit relu comme s'il n'avait jamais été tiré. C'est un simple
//! buffer de lookahead consulté avant de déléguer à la source.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{PcmChunk, PcmError, StreamSpec};

/// Séquence asynchrone de chunks PCM, tirée par le consommateur.
#[async_trait]
pub trait PcmStream: Send {
    /// Spec des chunks produits par ce flux.
    fn spec(&self) -> StreamSpec;

    /// Tire le prochain chunk ; `None` à l'épuisement du flux.
    async fn next_chunk(&mut self) -> Result<Option<PcmChunk>, PcmError>;
}

/// Source en mémoire : file de chunks pré-remplie.
pub struct MemoryStream {
    spec: StreamSpec,
    chunks: VecDeque<PcmChunk>,
}

impl MemoryStream {
    pub fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            chunks: VecDeque::new(),
        }
    }

    /// Source d'un seul chunk.
    pub fn from_chunk(chunk: PcmChunk) -> Self {
        let spec = chunk.spec();
        let mut stream = Self::new(spec);
        stream.chunks.push_back(chunk);
        stream
    }

    /// Ajoute un chunk en queue ; la spec doit correspondre.
    pub fn push_chunk(&mut self, chunk: PcmChunk) -> Result<(), PcmError> {
        if !chunk.spec().compatible_with(&self.spec) {
            return Err(PcmError::SpecMismatch {
                expected: self.spec.to_string(),
                actual: chunk.spec().to_string(),
            });
        }
        self.chunks.push_back(chunk);
        Ok(())
    }
}

#[async_trait]
impl PcmStream for MemoryStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    async fn next_chunk(&mut self) -> Result<Option<PcmChunk>, PcmError> {
        Ok(self.chunks.pop_front())
    }
}

/// Wrapper de lookahead autour d'un flux quelconque.
///
/// Les chunks rendus via [`push_back`](Self::push_back) sont restitués avant
/// toute nouvelle lecture de la source, dernier rendu en premier.
pub struct PushbackStream<S> {
    inner: S,
    pending: VecDeque<PcmChunk>,
}

impl<S: PcmStream> PushbackStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    /// Rend un chunk non consommé ; il sera relu en premier.
    pub fn push_back(&mut self, chunk: PcmChunk) {
        self.pending.push_front(chunk);
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: PcmStream> PcmStream for PushbackStream<S> {
    fn spec(&self) -> StreamSpec {
        self.inner.spec()
    }

    async fn next_chunk(&mut self) -> Result<Option<PcmChunk>, PcmError> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        self.inner.next_chunk().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(samples: Vec<i16>) -> PcmChunk {
        PcmChunk::from_i16_samples(samples, 48_000, 1)
    }

    #[tokio::test]
    async fn test_memory_stream_order() {
        let mut stream = MemoryStream::from_chunk(chunk_of(vec![1, 2]));
        stream.push_chunk(chunk_of(vec![3])).unwrap();

        let first = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(first.frames(), 2);
        let second = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(second.frames(), 1);
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_stream_rejects_foreign_spec() {
        let mut stream = MemoryStream::from_chunk(chunk_of(vec![1]));
        let foreign = PcmChunk::from_i16_samples(vec![1, 2], 44_100, 1);
        assert!(stream.push_chunk(foreign).is_err());
    }

    #[tokio::test]
    async fn test_pushback_restores_unconsumed_data() {
        let mut source = MemoryStream::from_chunk(chunk_of(vec![1, 2, 3, 4]));
        source.push_chunk(chunk_of(vec![5])).unwrap();
        let mut stream = PushbackStream::new(source);

        let chunk = stream.next_chunk().await.unwrap().unwrap();
        let (head, tail) = chunk.split_at_frames(1);
        assert_eq!(head.frames(), 1);
        stream.push_back(tail);

        // Le reliquat revient avant la suite de la source.
        let replayed = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(replayed.frames(), 3);
        let next = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(next.frames(), 1);
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pushback_is_lifo() {
        let source = MemoryStream::new(StreamSpec::new(
            crate::SampleFormat::interleaved(crate::SampleKind::I16),
            48_000,
            1,
        ));
        let mut stream = PushbackStream::new(source);
        stream.push_back(chunk_of(vec![1]));
        stream.push_back(chunk_of(vec![2, 2]));

        assert_eq!(stream.next_chunk().await.unwrap().unwrap().frames(), 2);
        assert_eq!(stream.next_chunk().await.unwrap().unwrap().frames(), 1);
    }
}
