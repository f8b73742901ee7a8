//! Error types for netkit-core

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Main error type for agent construction and cache writes
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(netkit::core::config))]
    Configuration {
        /// The error message describing the configuration issue
        message: String,
    },

    /// Request could not be turned into a transport call
    #[error("Invalid request URL: {url}")]
    #[diagnostic(
        code(netkit::core::invalid_url),
        help("Return a host-only base URL and a path from request_url, or an absolute request_url")
    )]
    InvalidUrl {
        /// The URL that failed to parse
        url: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Cache store error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] netkit_cache::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(netkit::core::serialization))]
    Serialization {
        /// The error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error with a message
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

/// Result type for netkit-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Response rejected by the status or body validator
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Status code rejected by the request's status validator
    #[error("Invalid status code ({status_code})")]
    #[diagnostic(code(netkit::validation::status_code))]
    InvalidStatusCode {
        /// The rejected status code
        status_code: u16,
    },

    /// JSON body does not match the request's shape rule
    #[error("Invalid JSON format")]
    #[diagnostic(code(netkit::validation::json_format))]
    InvalidJsonFormat,
}

/// Opaque failure reported by the transport adapter
#[derive(Error, Debug, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(netkit::transport))]
pub struct TransportError {
    message: String,
    timed_out: bool,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create a transport error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            source: None,
        }
    }

    /// Wrap an underlying error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
            source: Some(Box::new(source)),
        }
    }

    /// Mark the error as a timeout
    #[must_use]
    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }

    /// Whether the transport gave up because of the request timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

/// Body could not be decoded into the declared response kind
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("Failed to parse {kind} response: {message}")]
#[diagnostic(code(netkit::serializer))]
pub struct SerializationError {
    /// Response kind that was requested
    pub kind: String,
    /// Parser diagnostic
    pub message: String,
}

/// Why a request finished in the failure state
#[derive(Error, Debug, Diagnostic)]
pub enum RequestError {
    /// Network-level failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    /// Response failed validation
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    /// Response body could not be parsed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Serialization(#[from] SerializationError),

    /// Request could not be built
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] Error),
}
