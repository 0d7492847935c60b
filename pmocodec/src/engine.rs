use async_trait::async_trait;
use bytes::Bytes;

use pmopcm::{PcmChunk, StreamSpec};

use crate::CodecError;

/// PCM produced by [`CodecEngine::decode`]: every frame of the compressed
/// blob, concatenated in order, interleaved, plus the spec it was decoded to.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub spec: StreamSpec,
    pub data: Bytes,
}

impl DecodedAudio {
    pub fn frames(&self) -> u64 {
        (self.data.len() / self.spec.bytes_per_frame()) as u64
    }
}

/// PCM handed to [`CodecEngine::encode`] together with its spec.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub spec: StreamSpec,
    pub data: Bytes,
}

/// Declarative filter-graph descriptor.
///
/// The format conversion itself is described by the `input`/`output` specs
/// given to [`CodecEngine::filter_graph`]; the descriptor carries the
/// remaining knobs.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    /// Gain applied to the signal, in decibels. `0.0` is a no-op.
    pub gain_db: f64,
}

/// Stateful handle built by [`CodecEngine::filter_graph`].
///
/// `is_final` marks the last chunk of the run so graphs with internal state
/// can drain it; the supplied graphs are length-preserving.
#[async_trait]
pub trait FilterHandle: Send {
    async fn apply(&mut self, chunk: PcmChunk, is_final: bool) -> Result<PcmChunk, CodecError>;
}

/// Opaque codec engine: compressed blob ↔ PCM frames, plus PCM filtering.
///
/// All calls are asynchronous and must be issued only while holding a
/// `pmopool` worker slot — the pool is what bounds native-codec concurrency.
#[async_trait]
pub trait CodecEngine: Send + Sync {
    /// Decodes a compressed blob into its full PCM content.
    async fn decode(&self, data: Bytes) -> Result<DecodedAudio, CodecError>;

    /// Encodes PCM frames into a compressed blob.
    async fn encode(&self, request: EncodeRequest) -> Result<Bytes, CodecError>;

    /// Builds a filter graph converting `input` PCM into `output` PCM.
    async fn filter_graph(
        &self,
        spec: &FilterSpec,
        input: StreamSpec,
        output: StreamSpec,
    ) -> Result<Box<dyn FilterHandle>, CodecError>;
}
