//! Error types for maxdeploy
//!
//! Uses `thiserror` for library errors; the binary wraps these in
//! `anyhow` at the command boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for maxdeploy operations
pub type DeployResult<T> = Result<T, DeployError>;

/// Main error type for maxdeploy operations
#[derive(Error, Debug)]
pub enum DeployError {
    /// Settings are missing or invalid, raised before any remote call
    #[error("{message}")]
    Settings { message: String },

    /// Credential encryption or decryption failed
    #[error("{message}")]
    Crypto { message: String },

    /// Connection or login handshake failure
    #[error("{message}")]
    Connect { message: String },

    /// The server rejected a pushed artifact
    #[error("error deploying {}: {message}", path.display())]
    Push { path: PathBuf, message: String },

    /// The report descriptor is missing or does not describe the report
    #[error("{message}")]
    ReportDescriptor { path: PathBuf, message: String },

    /// A database configuration sequence failed
    #[error("{message}")]
    DbConfig { message: String },

    /// Extraction failed
    #[error("{message}")]
    Extract { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing error in a report descriptor
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
