use async_trait::async_trait;

use pmopcm::{convert, PcmChunk, StreamSpec};

use crate::{CodecError, FilterHandle, FilterSpec};

/// Pure-PCM filter graph: gain plus sample-format conversion.
///
/// Stateless across chunks, so `is_final` needs no drain step. Sample rate
/// and channel count must match between input and output; resampling is a
/// different engine's job.
pub struct PcmFilter {
    gain_db: f64,
    input: StreamSpec,
    output: StreamSpec,
}

impl PcmFilter {
    pub fn new(
        spec: &FilterSpec,
        input: StreamSpec,
        output: StreamSpec,
    ) -> Result<Self, CodecError> {
        if input.sample_rate != output.sample_rate || input.channels != output.channels {
            return Err(CodecError::Unsupported(format!(
                "filter graph cannot resample or remap channels ({input} -> {output})"
            )));
        }
        Ok(Self {
            gain_db: spec.gain_db,
            input,
            output,
        })
    }
}

#[async_trait]
impl FilterHandle for PcmFilter {
    async fn apply(&mut self, chunk: PcmChunk, _is_final: bool) -> Result<PcmChunk, CodecError> {
        if !chunk.spec().compatible_with(&self.input) {
            return Err(CodecError::Filter(format!(
                "chunk spec {} does not match filter input {}",
                chunk.spec(),
                self.input
            )));
        }
        let gained = convert::apply_gain(&chunk, self.gain_db)
            .map_err(|e| CodecError::Filter(e.to_string()))?;
        convert::convert_format(&gained, self.output.format)
            .map_err(|e| CodecError::Filter(e.to_string()))
    }
}
