//! Versioned, expiring on-disk response cache for netkit
//!
//! This crate owns the persistence side of cacheable requests:
//! - Deterministic cache key computation from the request fingerprint
//! - One payload blob plus one metadata record per key
//! - Read-time validation (version, sensitive data, app version, expiry)
//! - Per-key mutual exclusion and atomic replacement on write
//!
//! # Overview
//!
//! Entries are never evicted here. Expiry is a judgment made by
//! [`CacheStore::load`] against the caller's [`CacheExpectation`]; a stale
//! entry stays on disk until the next successful response overwrites it.
//!
//! # Cache Key Computation
//!
//! Cache keys are computed from:
//! - HTTP method
//! - Host (base URL) and request URL
//! - The request argument after the descriptor's cache filter

#![expect(
    clippy::missing_errors_doc,
    reason = "Error variants are documented on the error enums"
)]

mod error;
pub mod key;
pub mod store;

// Re-export error types at crate root
pub use error::{CacheError, Error, Result};

// Re-export main types
pub use key::{CacheKey, CacheKeyEnvelope};
pub use store::{CacheEntry, CacheExpectation, CacheMetadata, CacheStore, cache_root};
