// src/error.rs

use thiserror::Error;

/// Core error types for Delta
#[derive(Error, Debug)]
pub enum Error {
    /// Relational store errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Document store errors
    #[error("Document store error: {0}")]
    DocumentStore(#[from] mongodb::error::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid filter pattern
    #[error("Invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Driver or migration module lookup failure
    #[error("Driver not found: {0}")]
    Resolution(String),

    /// Driver configuration failure
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration execution failure
    #[error("Migration error: {0}")]
    Migration(String),

    /// Operation not supported by this driver
    #[error("Not implemented")]
    NotImplemented,
}

/// Result type alias using Delta's Error type
pub type Result<T> = std::result::Result<T, Error>;
