use thiserror::Error;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("serialize failure: {0}")]
    Serialize(String),

    #[error("validation failure: {0}")]
    Validate(String),

    #[error("schema version mismatch: {found} vs {expected}")]
    Version { found: u8, expected: u8 },

    #[error("unknown payload type {0:?}")]
    UnknownType(String),
}
