//! Request descriptors: what to fetch and how to treat the response.
//!
//! A concrete request implements [`RequestDescriptor`] and overrides only the
//! methods it needs. Every method has a default, so the smallest useful
//! descriptor is a type returning a `request_url`.

use crate::request::Request;
use crate::validator::JsonShape;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// HEAD
    Head,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

impl RequestMethod {
    /// Method name as sent on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }

    /// Whether arguments travel in the query string rather than the body
    #[must_use]
    pub const fn encodes_arguments_in_query(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }

    /// Parse a method name, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "HEAD" => Some(Self::Head),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request argument is encoded into the body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSerializerType {
    /// `application/x-www-form-urlencoded`
    #[default]
    Http,
    /// `application/json`
    Json,
}

/// How the response body is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSerializerType {
    /// Raw bytes
    Http,
    /// JSON value
    #[default]
    Json,
    /// XML document
    Xml,
}

impl fmt::Display for ResponseSerializerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("raw"),
            Self::Json => f.write_str("json"),
            Self::Xml => f.write_str("xml"),
        }
    }
}

/// Scheduling hint passed through to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Background work
    Low,
    /// Normal priority
    #[default]
    Default,
    /// User-visible work
    High,
}

/// Username and password for HTTP basic authorization
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl BasicAuth {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Fully specified raw request.
///
/// When a descriptor returns one from
/// [`RequestDescriptor::build_custom_url_request`], its URL, method, headers,
/// body and timeout are used verbatim and the computed values are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomRequest {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: RequestMethod,
    /// Header fields
    pub headers: BTreeMap<String, String>,
    /// Body bytes
    pub body: Option<Bytes>,
    /// Timeout; the transport default applies when absent
    pub timeout: Option<Duration>,
}

impl CustomRequest {
    /// A GET request for `url` with no headers or body
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: RequestMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }
}

/// Declares a request. All methods have defaults.
///
/// The `*_preprocessor` hooks run on the worker that produced the result
/// (the calling thread for cache hits); the `*_filter` hooks run on the
/// agent's serialized notification queue.
#[allow(unused_variables)]
pub trait RequestDescriptor: Send + Sync + 'static {
    /// Host part of the URL, e.g. `https://api.example.com`.
    /// Empty means "use the agent's configured base URL".
    fn base_url(&self) -> String {
        String::new()
    }

    /// Path of the request, e.g. `/v1/user`. An absolute URL here wins over
    /// the base URL.
    fn request_url(&self) -> String {
        String::new()
    }

    /// CDN host used instead of the base URL when [`use_cdn`](Self::use_cdn)
    fn cdn_url(&self) -> String {
        String::new()
    }

    /// Route the request through the CDN host
    fn use_cdn(&self) -> bool {
        false
    }

    /// HTTP method
    fn request_method(&self) -> RequestMethod {
        RequestMethod::Get
    }

    /// Body encoding for the argument
    fn request_serializer_type(&self) -> RequestSerializerType {
        RequestSerializerType::Http
    }

    /// Decoding of the response body
    fn response_serializer_type(&self) -> ResponseSerializerType {
        ResponseSerializerType::Json
    }

    /// Request timeout
    fn request_timeout_interval(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Argument payload (query string or body, depending on method)
    fn request_argument(&self) -> Option<serde_json::Value> {
        None
    }

    /// Reduce the argument to the parts that identify the cached response
    fn cache_file_name_filter_for_request_argument(
        &self,
        argument: Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        argument
    }

    /// Basic authorization credentials
    fn request_authorization_header_field_array(&self) -> Option<BasicAuth> {
        None
    }

    /// Extra header fields
    fn request_header_field_value_dictionary(&self) -> Option<BTreeMap<String, String>> {
        None
    }

    /// A raw request that supersedes URL, method, argument, timeout and
    /// serializer when present
    fn build_custom_url_request(&self) -> Option<CustomRequest> {
        None
    }

    /// Whether the transport may use a cellular radio
    fn allows_cellular_access(&self) -> bool {
        true
    }

    /// Scheduling hint for the transport
    fn request_priority(&self) -> RequestPriority {
        RequestPriority::Default
    }

    /// Save the body to this path instead of keeping it in memory.
    /// Download requests never touch the response cache.
    fn resumable_download_path(&self) -> Option<PathBuf> {
        None
    }

    /// Shape the parsed JSON body must have
    fn json_validator(&self) -> Option<JsonShape> {
        None
    }

    /// Whether `status_code` counts as success
    fn status_code_validator(&self, status_code: u16) -> bool {
        (200..=299).contains(&status_code)
    }

    /// Maximum age of a usable cached response; zero or less disables reads
    fn cache_time_in_seconds(&self) -> i64 {
        -1
    }

    /// Version stamp; changing it invalidates existing entries
    fn cache_version(&self) -> i64 {
        0
    }

    /// Description of context outside URL and argument (e.g. the signed-in
    /// user); a change invalidates existing entries
    fn cache_sensitive_data(&self) -> Option<String> {
        None
    }

    /// Write cache entries on the blocking pool without waiting for them
    fn write_cache_asynchronously(&self) -> bool {
        true
    }

    /// Whether successful network responses are written to the cache
    fn writes_cache(&self) -> bool {
        self.cache_time_in_seconds() > 0 && self.resumable_download_path().is_none()
    }

    /// Runs after a success, before the hand-off to the notification queue
    fn request_complete_preprocessor(&self, request: &Request) {}

    /// Runs on the notification queue after a success
    fn request_complete_filter(&self, request: &Request) {}

    /// Runs after a failure, before the hand-off to the notification queue
    fn request_failed_preprocessor(&self, request: &Request) {}

    /// Runs on the notification queue after a failure
    fn request_failed_filter(&self, request: &Request) {}
}
