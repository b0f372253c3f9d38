use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfdmFrameError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid subcarrier allocation: {0}")]
    InvalidAllocation(String),

    #[error("Payload of {len} bytes exceeds the configured maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Frame not assembled")]
    NotAssembled,

    #[error("Invalid input size")]
    InvalidInputSize,

    #[error("FEC error: {0}")]
    FecError(String),

    #[error("Header CRC mismatch")]
    HeaderCrcMismatch,

    #[error("Protocol version mismatch: expected {expected}, found {found}")]
    ProtocolMismatch { expected: u8, found: u8 },

    #[error("Unknown scheme in header: {0}")]
    UnknownScheme(String),
}

pub type Result<T> = std::result::Result<T, OfdmFrameError>;
