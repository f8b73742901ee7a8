//! Transport seam: the request handed to the network layer and its raw result.
//!
//! The core never opens sockets. A [`TransportAdapter`] receives a fully
//! resolved [`TransportRequest`] and returns a [`RawResponse`]. Cancellation
//! is expressed by dropping the returned future.

use crate::config::NetworkConfig;
use crate::descriptor::{
    BasicAuth, RequestDescriptor, RequestMethod, RequestPriority, RequestSerializerType,
};
use crate::error::{Error, Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Download progress observer.
///
/// Receives the bytes on disk so far, including any resumed prefix, and the
/// expected total when the server announced one. Runs on the transport task.
#[derive(Clone)]
pub struct DownloadProgress(Arc<dyn Fn(u64, Option<u64>) + Send + Sync>);

impl DownloadProgress {
    pub fn new(observer: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(observer))
    }

    pub fn report(&self, written: u64, total: Option<u64>) {
        (self.0)(written, total);
    }
}

impl fmt::Debug for DownloadProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DownloadProgress")
    }
}

/// A resolved request, ready for the network
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute URL
    pub url: String,
    /// HTTP method
    pub method: RequestMethod,
    /// Header fields
    pub headers: BTreeMap<String, String>,
    /// Basic authorization credentials
    pub authorization: Option<BasicAuth>,
    /// Argument to encode per `method` and `serializer`
    pub argument: Option<serde_json::Value>,
    /// Raw body from a custom request; takes precedence over `argument`
    pub body: Option<Bytes>,
    /// Body encoding for `argument`
    pub serializer: RequestSerializerType,
    /// Timeout for the whole exchange
    pub timeout: Duration,
    /// Whether a cellular radio may be used
    pub allows_cellular_access: bool,
    /// Scheduling hint
    pub priority: RequestPriority,
    /// Persist the body here instead of returning it
    pub download_path: Option<PathBuf>,
    /// Told about every chunk written to `download_path`
    pub download_progress: Option<DownloadProgress>,
}

/// What came back from the network
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Header fields (lower-cased names)
    pub headers: BTreeMap<String, String>,
    /// Body bytes; empty for download requests
    pub body: Bytes,
}

impl RawResponse {
    /// Response with the given status and body and no headers
    pub fn new(status_code: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }
}

/// Performs HTTP exchanges. Owns connection reuse, redirects, TLS and retry
/// policy.
#[async_trait]
pub trait TransportAdapter: Send + Sync + std::fmt::Debug {
    /// Execute one request
    async fn execute(
        &self,
        request: &TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Resolve a descriptor into a [`TransportRequest`].
///
/// A custom request is used verbatim. Otherwise an absolute `request_url`
/// wins; a relative one is passed through the configured URL filters and
/// joined to the CDN or base URL.
pub fn build_transport_request(
    descriptor: &dyn RequestDescriptor,
    config: &NetworkConfig,
) -> Result<TransportRequest> {
    let mut headers = descriptor
        .request_header_field_value_dictionary()
        .unwrap_or_default();
    let authorization = descriptor.request_authorization_header_field_array();
    let download_path = descriptor.resumable_download_path();
    let priority = descriptor.request_priority();

    if let Some(custom) = descriptor.build_custom_url_request() {
        Url::parse(&custom.url).map_err(|e| Error::invalid_url(&custom.url, e))?;
        // Explicit custom headers win over descriptor-wide ones
        headers.extend(custom.headers);
        return Ok(TransportRequest {
            url: custom.url,
            method: custom.method,
            headers,
            authorization,
            argument: None,
            body: custom.body,
            serializer: RequestSerializerType::Http,
            timeout: custom.timeout.unwrap_or(crate::descriptor::DEFAULT_TIMEOUT),
            allows_cellular_access: true,
            priority,
            download_path,
            download_progress: None,
        });
    }

    Ok(TransportRequest {
        url: build_request_url(descriptor, config)?,
        method: descriptor.request_method(),
        headers,
        authorization,
        argument: descriptor.request_argument(),
        body: None,
        serializer: descriptor.request_serializer_type(),
        timeout: descriptor.request_timeout_interval(),
        allows_cellular_access: descriptor.allows_cellular_access(),
        priority,
        download_path,
        download_progress: None,
    })
}

/// The absolute URL a descriptor resolves to
pub fn build_request_url(
    descriptor: &dyn RequestDescriptor,
    config: &NetworkConfig,
) -> Result<String> {
    let mut detail = descriptor.request_url();

    if let Ok(url) = Url::parse(&detail)
        && url.has_host()
    {
        return Ok(detail);
    }

    for filter in &config.url_filters {
        detail = filter.filter_url(&detail, descriptor);
    }

    let base = effective_host(descriptor, config);
    if base.is_empty() {
        // Filters may have produced an absolute URL on their own
        return Url::parse(&detail)
            .map(|u| u.to_string())
            .map_err(|e| Error::invalid_url(&detail, e));
    }

    let mut base_url = Url::parse(&base).map_err(|e| Error::invalid_url(&base, e))?;
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }
    base_url
        .join(&detail)
        .map(|u| u.to_string())
        .map_err(|e| Error::invalid_url(&detail, e))
}

/// Host the request resolves against: the descriptor's own CDN/base URL,
/// falling back to the configured one
pub fn effective_host(descriptor: &dyn RequestDescriptor, config: &NetworkConfig) -> String {
    let (own, configured) = if descriptor.use_cdn() {
        (descriptor.cdn_url(), &config.cdn_url)
    } else {
        (descriptor.base_url(), &config.base_url)
    };
    if own.is_empty() {
        configured.clone()
    } else {
        own
    }
}
