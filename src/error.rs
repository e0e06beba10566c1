//! Error types for the UDAP gateway

use std::io;

use thiserror::Error;

use crate::udap::MetadataError;

/// Result type alias for the UDAP gateway
pub type Result<T> = std::result::Result<T, Error>;

/// UDAP gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials could not be loaded, or metadata could not be signed
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
