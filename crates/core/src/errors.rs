//! Error types

use std::time::Duration;
use thiserror::Error;

/// Render session errors
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Selector {selector} not present after {timeout:?}")]
    SelectorTimeout { selector: String, timeout: Duration },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    #[error("Session {0} has no open browser context")]
    SessionNotOpen(usize),

    #[error("Session closed")]
    Closed,
}

impl ScrapeError {
    /// The remote browser context is gone and only a fresh navigation helps
    pub fn is_session_lost(&self) -> bool {
        matches!(self, ScrapeError::SessionNotOpen(_) | ScrapeError::Closed)
    }
}

/// Reference data errors
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Reference source unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias
pub type ScrapeResult<T> = Result<T, ScrapeError>;
pub type ReferenceResult<T> = Result<T, ReferenceError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
