#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("filter error: {0}")]
    Filter(String),
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}

impl From<claxon::Error> for CodecError {
    fn from(err: claxon::Error) -> Self {
        CodecError::Decode(err.to_string())
    }
}
