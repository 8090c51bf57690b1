//! Error types for Triangulate.
//!
//! Library crates use [`ResearchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Triangulate operations.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// Configuration loading error or missing credential.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure: connect, timeout, body read.
    #[error("network error: {0}")]
    Network(String),

    /// A vendor answered with a non-success status.
    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    /// Vendor payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Input validation error (empty query, malformed custom URLs).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The completion call behind answer synthesis failed.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// None of the three source adapters produced usable results.
    #[error("no results from any source ({} diagnostics)", diagnostics.len())]
    NoSources { diagnostics: Vec<String> },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ResearchError>;

impl ResearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an upstream error for a vendor response.
    pub fn upstream(service: impl Into<String>, status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error means a source was never configured, as opposed
    /// to a source that was tried and failed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}
