use std::io;

#[derive(thiserror::Error, Debug)]
pub enum PcmError {
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("sample data length {len} is not aligned to {expected}-byte frames")]
    Misaligned { len: usize, expected: usize },
    #[error("stream spec mismatch: expected {expected}, got {actual}")]
    SpecMismatch { expected: String, actual: String },
    #[error("stream source failed: {0}")]
    Source(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
