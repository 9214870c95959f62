//! Error types for railchain

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    InsufficientFunds {
        participant: String,
        balance: f64,
        requested: f64,
    },
    MalformedRequest(String),
    InvalidChainCandidate(String),
    PeerUnreachable(String),
    CryptoError(String),
    MiningAborted(String),
    EmptyChain,
    ConfigError(String),
    IoError(String),
    SerializationError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InsufficientFunds {
                participant,
                balance,
                requested,
            } => write!(
                f,
                "Insufficient funds: {} has {} but tried to send {}",
                participant, balance, requested
            ),
            ChainError::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            ChainError::InvalidChainCandidate(msg) => write!(f, "Invalid chain candidate: {}", msg),
            ChainError::PeerUnreachable(msg) => write!(f, "Peer unreachable: {}", msg),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::MiningAborted(msg) => write!(f, "Mining aborted: {}", msg),
            ChainError::EmptyChain => write!(f, "Ledger has no genesis block"),
            ChainError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            ChainError::IoError(msg) => write!(f, "IO error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
