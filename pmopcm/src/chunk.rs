//! Chunk PCM immuable partagé.
//!
//! Un [`PcmChunk`] encapsule un run d'échantillons dans un [`Bytes`] : le
//! découpage par frames ne clone que les pointeurs, jamais les échantillons.

use std::ops::Range;

use bytes::Bytes;

use crate::{PcmError, SampleFormat, SampleKind, StreamSpec};

/// Run d'échantillons immuable avec sa spec.
///
/// # Exemples
///
/// ```
/// use pmopcm::PcmChunk;
///
/// let chunk = PcmChunk::from_i16_samples(vec![0, 1, 2, 3], 48_000, 2);
/// assert_eq!(chunk.frames(), 2);
/// let tail = chunk.slice_frames(1..2);
/// assert_eq!(tail.frames(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct PcmChunk {
    spec: StreamSpec,
    data: Bytes,
}

impl PcmChunk {
    /// Crée un chunk depuis des octets bruts, en vérifiant l'alignement.
    pub fn new(spec: StreamSpec, data: Bytes) -> Result<Self, PcmError> {
        spec.validate()?;
        let bpf = spec.bytes_per_frame();
        if data.len() % bpf != 0 {
            return Err(PcmError::Misaligned {
                len: data.len(),
                expected: bpf,
            });
        }
        Ok(Self { spec, data })
    }

    /// Chunk de silence (échantillons à zéro).
    pub fn silence(spec: StreamSpec, frames: u64) -> Self {
        let data = Bytes::from(vec![0u8; frames as usize * spec.bytes_per_frame()]);
        Self { spec, data }
    }

    /// Chunk entrelacé i16 (constructeur de commodité, surtout pour les tests).
    pub fn from_i16_samples(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "sample count must be a whole number of frames"
        );
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            spec: StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), sample_rate, channels),
            data: Bytes::from(data),
        }
    }

    /// Chunk entrelacé depuis des échantillons i32 (sign-étendus pour I24).
    pub fn from_i32_samples(
        kind: SampleKind,
        samples: &[i32],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, PcmError> {
        let data = crate::convert::i32_samples_to_bytes(samples, kind)?;
        Self::new(
            StreamSpec::new(SampleFormat::interleaved(kind), sample_rate, channels),
            Bytes::from(data),
        )
    }

    #[inline(always)]
    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    #[inline(always)]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Nombre de frames du chunk.
    #[inline(always)]
    pub fn frames(&self) -> u64 {
        (self.data.len() / self.spec.bytes_per_frame()) as u64
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sous-chunk `[range.start, range.end)` en frames, sans copie.
    ///
    /// Uniquement défini pour les chunks entrelacés : un plan de canaux ne se
    /// découpe pas par frames contiguës.
    pub fn slice_frames(&self, range: Range<u64>) -> PcmChunk {
        assert!(
            !self.spec.format.is_planar(),
            "slice_frames requires an interleaved chunk"
        );
        assert!(
            range.start <= range.end && range.end <= self.frames(),
            "frame range {:?} out of bounds for chunk of {} frames",
            range,
            self.frames()
        );
        let bpf = self.spec.bytes_per_frame();
        let start = range.start as usize * bpf;
        let end = range.end as usize * bpf;
        PcmChunk {
            spec: self.spec,
            data: self.data.slice(start..end),
        }
    }

    /// Scinde le chunk en deux à la frame `at` : `(avant, après)`.
    pub fn split_at_frames(&self, at: u64) -> (PcmChunk, PcmChunk) {
        let total = self.frames();
        (
            self.slice_frames(0..at),
            self.slice_frames(at..total),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_creation_and_frames() {
        let chunk = PcmChunk::from_i16_samples(vec![1, 2, 3, 4, 5, 6], 44_100, 2);
        assert_eq!(chunk.frames(), 3);
        assert!(!chunk.is_empty());
        assert_eq!(chunk.spec().bytes_per_frame(), 4);
    }

    #[test]
    fn test_misaligned_data_rejected() {
        let spec = StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), 48_000, 2);
        let err = PcmChunk::new(spec, Bytes::from(vec![0u8; 5])).unwrap_err();
        assert!(matches!(err, PcmError::Misaligned { .. }));
    }

    #[test]
    fn test_slice_is_zero_copy_view() {
        let chunk = PcmChunk::from_i16_samples(vec![10, 20, 30, 40], 48_000, 1);
        let mid = chunk.slice_frames(1..3);
        assert_eq!(mid.frames(), 2);
        let expected = [20i16.to_le_bytes(), 30i16.to_le_bytes()].concat();
        assert_eq!(mid.data().as_ref(), expected.as_slice());
    }

    #[test]
    fn test_split_at_frames() {
        let chunk = PcmChunk::from_i16_samples(vec![1, 2, 3, 4], 48_000, 1);
        let (head, tail) = chunk.split_at_frames(1);
        assert_eq!(head.frames(), 1);
        assert_eq!(tail.frames(), 3);
    }

    #[test]
    fn test_silence() {
        let spec = StreamSpec::new(SampleFormat::interleaved(SampleKind::I16), 8_000, 1);
        let chunk = PcmChunk::silence(spec, 16);
        assert_eq!(chunk.frames(), 16);
        assert!(chunk.data().iter().all(|b| *b == 0));
    }
}
