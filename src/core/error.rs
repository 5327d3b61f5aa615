use super::Handle;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PmemError {
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Corrupt chain: {0}")]
    CorruptChain(String),

    #[error("Unsupported eviction policy: {0}")]
    PolicyUnsupported(String),

    #[error("Invalid handle {0}")]
    InvalidHandle(Handle),

    #[error("Object {handle} is not a {expected}")]
    TypeMismatch {
        handle: Handle,
        expected: &'static str,
    },

    #[error("Write to {0} without an undo record")]
    UnloggedWrite(Handle),

    #[error("Handle {0} is not the head of either log buffer")]
    NotABufferHead(Handle),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PmemError {
    /// Re-surface an error raised inside a transaction scope as an abort.
    pub fn into_aborted(self) -> Self {
        match self {
            PmemError::TransactionAborted(_) => self,
            other => PmemError::TransactionAborted(other.to_string()),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, PmemError::TransactionAborted(_))
    }
}

pub type Result<T> = std::result::Result<T, PmemError>;

impl From<std::io::Error> for PmemError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for PmemError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for PmemError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
