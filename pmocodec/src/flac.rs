use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;

use pmopcm::{convert, SampleFormat, SampleKind, StreamSpec};

use crate::{
    engine::{CodecEngine, DecodedAudio, EncodeRequest, FilterHandle, FilterSpec},
    filter::PcmFilter,
    CodecError,
};

/// Pure-Rust FLAC engine: `claxon` decode, `flacenc` encode.
///
/// FLAC stores each channel as its own subframe, so the at-rest layout is
/// planar regardless of the interleaved PCM handed in; decoding always
/// yields interleaved PCM again. Integer kinds up to 24 bits round-trip
/// losslessly; `I32`/`F32` are transient in-memory formats and are rejected
/// at encode time.
pub struct FlacEngine {
    block_size: Option<usize>,
}

impl FlacEngine {
    pub fn new() -> Self {
        Self { block_size: None }
    }

    /// Overrides the encoder block size (defaults to flacenc's own choice).
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size: Some(block_size),
        }
    }
}

impl Default for FlacEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodecEngine for FlacEngine {
    async fn decode(&self, data: Bytes) -> Result<DecodedAudio, CodecError> {
        let compressed = data.len();
        let decoded = tokio::task::spawn_blocking(move || decode_blocking(&data))
            .await
            .map_err(|err| CodecError::TaskJoin {
                role: "flac-decode",
                details: err.to_string(),
            })??;
        tracing::debug!(
            compressed,
            frames = decoded.frames(),
            "FLAC blob decoded"
        );
        Ok(decoded)
    }

    async fn encode(&self, request: EncodeRequest) -> Result<Bytes, CodecError> {
        let block_size = self.block_size;
        let raw = request.data.len();
        let encoded = tokio::task::spawn_blocking(move || encode_blocking(request, block_size))
            .await
            .map_err(|err| CodecError::TaskJoin {
                role: "flac-encode",
                details: err.to_string(),
            })??;
        tracing::debug!(raw, compressed = encoded.len(), "PCM encoded to FLAC");
        Ok(encoded)
    }

    async fn filter_graph(
        &self,
        spec: &FilterSpec,
        input: StreamSpec,
        output: StreamSpec,
    ) -> Result<Box<dyn FilterHandle>, CodecError> {
        Ok(Box::new(PcmFilter::new(spec, input, output)?))
    }
}

fn decode_blocking(data: &[u8]) -> Result<DecodedAudio, CodecError> {
    let mut reader = claxon::FlacReader::new(Cursor::new(data))?;
    let info = reader.streaminfo();

    let kind = match info.bits_per_sample {
        16 => SampleKind::I16,
        24 => SampleKind::I24,
        32 => SampleKind::I32,
        other => {
            return Err(CodecError::Unsupported(format!(
                "{other}-bit FLAC streams are unsupported"
            )));
        }
    };
    let spec = StreamSpec::new(
        SampleFormat::interleaved(kind),
        info.sample_rate,
        info.channels as u16,
    );

    let expected = info.samples.unwrap_or(0) as usize * info.channels as usize;
    let mut samples = Vec::with_capacity(expected);
    for sample in reader.samples() {
        samples.push(sample?);
    }

    let bytes = convert::i32_samples_to_bytes(&samples, kind)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(DecodedAudio {
        spec,
        data: Bytes::from(bytes),
    })
}

fn encode_blocking(request: EncodeRequest, block_size: Option<usize>) -> Result<Bytes, CodecError> {
    use flacenc::component::BitRepr;
    use flacenc::error::Verify;

    let spec = request.spec;
    let kind = spec.format.kind();
    if kind.is_float() || kind.bits_per_sample() > 24 {
        return Err(CodecError::Unsupported(format!(
            "FLAC cannot losslessly encode {kind} samples"
        )));
    }
    if request.data.is_empty() {
        return Err(CodecError::Encode("empty PCM payload".into()));
    }

    let interleaved: Vec<u8> = if spec.format.is_planar() {
        convert::planar_to_interleaved(&request.data, spec.channels, kind.bytes_per_sample())
    } else {
        request.data.to_vec()
    };
    let samples = convert::bytes_to_i32_samples(&interleaved, kind)
        .map_err(|e| CodecError::Encode(e.to_string()))?;

    let mut config = flacenc::config::Encoder::default();
    if let Some(bs) = block_size {
        config.block_size = bs;
    }
    let config = config
        .into_verified()
        .map_err(|(_, err)| CodecError::Encode(format!("encoder config rejected: {err:?}")))?;

    let source = flacenc::source::MemSource::from_samples(
        &samples,
        spec.channels as usize,
        kind.bits_per_sample() as usize,
        spec.sample_rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|err| CodecError::Encode(format!("{err:?}")))?;

    let mut sink = flacenc::bitsink::ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|err| CodecError::Encode(format!("{err:?}")))?;
    Ok(Bytes::from(sink.as_slice().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_i16(frames: usize, channels: usize) -> Vec<i16> {
        (0..frames * channels)
            .map(|i| ((i as f64 * 0.05).sin() * 12_000.0) as i16)
            .collect()
    }

    #[tokio::test]
    async fn test_i16_roundtrip_is_lossless() {
        let engine = FlacEngine::new();
        let samples = sine_i16(4_800, 2);
        let chunk = pmopcm::PcmChunk::from_i16_samples(samples, 48_000, 2);
        let spec = chunk.spec();

        let flac = engine
            .encode(EncodeRequest {
                spec,
                data: chunk.data().clone(),
            })
            .await
            .unwrap();
        assert!(flac.starts_with(b"fLaC"));

        let decoded = engine.decode(flac).await.unwrap();
        assert_eq!(decoded.spec.sample_rate, 48_000);
        assert_eq!(decoded.spec.channels, 2);
        assert_eq!(decoded.spec.format.kind(), SampleKind::I16);
        assert_eq!(decoded.data, chunk.data().clone());
    }

    #[tokio::test]
    async fn test_planar_input_is_accepted() {
        let engine = FlacEngine::new();
        let chunk = pmopcm::PcmChunk::from_i16_samples(sine_i16(1_000, 2), 44_100, 2);
        let planar =
            convert::convert_format(&chunk, SampleFormat::planar(SampleKind::I16)).unwrap();

        let flac = engine
            .encode(EncodeRequest {
                spec: planar.spec(),
                data: planar.data().clone(),
            })
            .await
            .unwrap();
        let decoded = engine.decode(flac).await.unwrap();
        // Always decoded back interleaved, identical to the original frames.
        assert_eq!(decoded.data, chunk.data().clone());
    }

    #[tokio::test]
    async fn test_float_encode_rejected() {
        let engine = FlacEngine::new();
        let spec = StreamSpec::new(SampleFormat::interleaved(SampleKind::F32), 48_000, 1);
        let err = engine
            .encode(EncodeRequest {
                spec,
                data: Bytes::from(vec![0u8; 64]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }
}
