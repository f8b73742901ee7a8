//! Request lifecycle and cache integration for netkit
//!
//! This crate turns a declared request into a single start/stop call:
//! - [`RequestDescriptor`]: what to fetch and how to treat the response
//! - [`Request`]: the lifecycle state machine and completion pipeline
//! - [`NetworkAgent`]: shared transport, cache, clock and notification queue
//! - [`Accessory`] and [`RequestDelegate`]: lifecycle and outcome observers
//!
//! # Overview
//!
//! Cacheable requests (positive `cache_time_in_seconds`) are served from the
//! on-disk cache when a fresh entry with matching version, sensitive data and
//! app version exists and its payload passes validation. Otherwise the
//! [`TransportAdapter`] is called, the response is validated and, on
//! success, written back to the cache.
//!
//! Delegate calls, completion callbacks and the `*_filter` hooks of every
//! request run one at a time on the agent's notification queue.

#![expect(
    clippy::missing_errors_doc,
    reason = "Error variants are documented on the error enums"
)]

pub mod accessory;
pub mod agent;
pub mod config;
pub mod delegate;
pub mod descriptor;
mod dispatch;
mod error;
pub mod request;
pub mod serializer;
pub mod transport;
pub mod validator;

pub use error::{
    Error, RequestError, Result, SerializationError, TransportError, ValidationError,
};

pub use accessory::{Accessory, AccessoryNotifier};
pub use agent::{NetworkAgent, NetworkAgentBuilder};
pub use config::{
    Clock, NetworkConfig, NetworkConfigBuilder, SystemClock, UrlArgumentsFilter, UrlFilter,
};
pub use delegate::{CompletionCallback, RequestDelegate};
pub use descriptor::{
    BasicAuth, CustomRequest, RequestDescriptor, RequestMethod, RequestPriority,
    RequestSerializerType, ResponseSerializerType,
};
pub use request::{Request, RequestState, Response};
pub use serializer::{DefaultSerializer, ResponseObject, Serializer};
pub use transport::{DownloadProgress, RawResponse, TransportAdapter, TransportRequest};
pub use validator::JsonShape;

// Cache types appear in the public API
pub use netkit_cache::{CacheError, CacheKey, CacheStore};
