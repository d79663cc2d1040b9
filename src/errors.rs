use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("not found")]
    NotFound,
    #[error("file exists")]
    FileExists,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid data proof")]
    InvalidDataProof,
    #[error("invalid proof at segment {segment}")]
    InvalidProof { segment: String },
    #[error("chain mismatch on field {field}")]
    ChainMismatch { field: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("operation not permitted in {0} mode")]
    Mode(String),
    #[error("transaction rejected: {0}")]
    Transaction(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("request timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type ChainResult<T> = Result<T, ChainError>;
