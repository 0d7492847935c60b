use uuid::Uuid;

use pmopcm::PcmError;
use pmopool::PoolError;
use pmostore::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum TimelineError {
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("write of {requested} frames at offset {offset} exceeds segment capacity {capacity}")]
    BufferOverflow {
        capacity: u64,
        offset: u64,
        requested: u64,
    },
    /// Invariant de l'arbre violé. Fatal : signale un bug de programmation,
    /// ne jamais rattraper en interne.
    #[error("timeline tree invariant violated: {0}")]
    InconsistentTree(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("track format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },
    #[error("replacement track does not share this track's store prefix")]
    StoreMismatch,
    #[error("invalid range: start {start} is past end {end}")]
    InvalidRange { start: u64, end: u64 },
    #[error("segment {0} has no persisted audio data")]
    MissingBlob(Uuid),
    #[error("no persisted record for track {0}")]
    MissingRecord(Uuid),
    #[error("corrupted metadata record: {0}")]
    Corrupt(String),
    #[error("invalid timeline config: {0}")]
    Config(String),
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<PoolError> for TimelineError {
    fn from(err: PoolError) -> Self {
        TimelineError::Codec(err.to_string())
    }
}

impl From<PcmError> for TimelineError {
    fn from(err: PcmError) -> Self {
        TimelineError::Stream(err.to_string())
    }
}
