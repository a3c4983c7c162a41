//! Crate-level error type.
//!
//! Each subsystem owns a narrow error enum (`TransportError`, `A2aError`,
//! `EmbeddingError`, `IndexError`, `MalformedMessage`); this type unifies them
//! for the node, configuration and API layers.

use thiserror::Error;

use crate::a2a::{A2aError, MalformedMessage};
use crate::network::TransportError;
use crate::search::{EmbeddingError, IndexError};

/// Top-level error for node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message bus failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Agent-to-agent request failure
    #[error("A2A error: {0}")]
    A2a(#[from] A2aError),

    /// Inbound message could not be interpreted
    #[error("Malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    /// Embedding model failure
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Similarity index failure
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Ingestion record rejected
    #[error("Ingestion error: {0}")]
    Ingest(String),

    /// HTTP API failure
    #[error("API error: {0}")]
    Api(String),

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result alias for node operations.
pub type Result<T> = std::result::Result<T, Error>;
