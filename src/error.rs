// Error types for CertFlux
//
// Structured error enum used across the ingestion pipeline. Worker failure
// classification (terminal vs. transient) matches on dedicated variants.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Main error type for CertFlux operations
#[derive(Debug, Error)]
pub enum CtError {
    /// HTTP request completed with a non-success status
    #[error("HTTP error (status {status}): {details}")]
    Http { status: u16, details: String },

    /// Parsing error for wire or data formats
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// HTTP client could not be constructed; terminal for a worker
    #[error("Failed to build CT log client: {details}")]
    ClientConstruction { details: String },

    /// Signed Tree Head could not be fetched; terminal for a worker
    #[error("Failed to fetch STH from '{url}': {details}")]
    SthFetch { url: String, details: String },

    /// Reqwest HTTP client errors
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV decoding errors from the CA-owner roster
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Base64 decoding errors from CT log responses
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// OpenSSL digest errors
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    /// Generic I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl CtError {
    /// Shorthand for a parse error with a formatted message.
    pub fn parse(message: impl Into<String>) -> Self {
        CtError::Parse {
            message: message.into(),
        }
    }

    /// True when a DNS resolution failure appears anywhere in the error
    /// chain. Workers treat this as terminal: the log host does not exist.
    pub fn is_dns_failure(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            let text = err.to_string();
            if text.contains("dns error")
                || text.contains("failed to lookup address")
                || text.contains("no such host")
            {
                return true;
            }
            current = err.source();
        }
        false
    }
}

impl From<serde_yaml::Error> for CtError {
    fn from(err: serde_yaml::Error) -> Self {
        CtError::Config {
            message: format!("invalid YAML: {}", err),
        }
    }
}
