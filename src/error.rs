//! RelayWarden Error Types

use thiserror::Error;

/// Result type alias for RelayWarden operations
pub type Result<T> = std::result::Result<T, Error>;

/// RelayWarden error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Relay lifecycle errors
    #[error("Relay error: {0}")]
    Relay(String),

    // Discovery errors
    #[error("No relay reachable on this network")]
    NoRelayFound,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable on a later timer tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Http(_) | Error::Io(_))
    }
}
