//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for cache store operations (writes, root resolution)
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(netkit::cache::io),
        help("Check file permissions and ensure the cache directory is writable")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(netkit::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(netkit::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a cached entry cannot be used.
///
/// Variants are listed in the order [`crate::CacheStore::load`] checks them;
/// the first failing check wins.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The declared cache duration disables caching
    #[error("cache time {seconds}s is not positive")]
    #[diagnostic(code(netkit::cache::invalid_cache_time))]
    InvalidCacheTime {
        /// The declared duration in seconds
        seconds: i64,
    },

    /// Metadata record is missing or cannot be parsed
    #[error("invalid cache metadata: {reason}")]
    #[diagnostic(code(netkit::cache::invalid_metadata))]
    InvalidMetadata {
        /// Why the metadata was rejected
        reason: String,
    },

    /// Stored format version differs from the declared one
    #[error("cache version mismatch: expected {expected}, found {found}")]
    #[diagnostic(
        code(netkit::cache::version_mismatch),
        help("The request's cache version changed since the entry was written")
    )]
    VersionMismatch {
        /// Version declared by the request
        expected: i64,
        /// Version recorded in the metadata
        found: i64,
    },

    /// Stored sensitive-data description differs from the current one
    #[error("cache sensitive data mismatch")]
    #[diagnostic(code(netkit::cache::sensitive_data_mismatch))]
    SensitiveDataMismatch {
        /// Description declared by the request
        expected: Option<String>,
        /// Description recorded in the metadata
        found: Option<String>,
    },

    /// Entry was written by a different application version
    #[error("app version mismatch: expected {expected}, found {found}")]
    #[diagnostic(code(netkit::cache::app_version_mismatch))]
    AppVersionMismatch {
        /// Current application version
        expected: String,
        /// Version recorded in the metadata
        found: String,
    },

    /// Entry is older than the declared duration
    #[error("cache entry expired: age {age_seconds}s exceeds {max_age_seconds}s")]
    #[diagnostic(code(netkit::cache::expired))]
    Expired {
        /// Age of the entry in seconds (negative when written in the future)
        age_seconds: i64,
        /// Declared maximum age
        max_age_seconds: i64,
    },

    /// Payload is missing, unreadable, or does not match its checksum
    #[error("invalid cache data: {reason}")]
    #[diagnostic(code(netkit::cache::invalid_cache_data))]
    InvalidCacheData {
        /// Why the payload was rejected
        reason: String,
    },
}

impl CacheError {
    /// Create an invalid-metadata error
    #[must_use]
    pub fn invalid_metadata(reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            reason: reason.into(),
        }
    }

    /// Create an invalid-data error
    #[must_use]
    pub fn invalid_data(reason: impl Into<String>) -> Self {
        Self::InvalidCacheData {
            reason: reason.into(),
        }
    }

    /// Stable numeric code for each kind, matching the ordering of checks
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Expired { .. } => -1,
            Self::VersionMismatch { .. } => -2,
            Self::SensitiveDataMismatch { .. } => -3,
            Self::AppVersionMismatch { .. } => -4,
            Self::InvalidCacheTime { .. } => -5,
            Self::InvalidMetadata { .. } => -6,
            Self::InvalidCacheData { .. } => -7,
        }
    }
}
