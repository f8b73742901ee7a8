//! reqwest transport for netkit
//!
//! [`ReqwestTransport`] implements [`TransportAdapter`] on top of a shared
//! `reqwest::Client`:
//! - Arguments travel in the query string for GET/HEAD/DELETE
//! - Otherwise they become a form body or a JSON body per the request
//!   serializer; a custom raw body takes precedence
//! - Download requests stream successful bodies to a sibling `.part` file
//!   that is renamed into place. A `.part` file left by an interrupted
//!   attempt is resumed with a `Range` request
//!
//! Cellular access and priority hints have no equivalent here and are
//! ignored.

use async_trait::async_trait;
use bytes::Bytes;
use netkit_core::{
    DownloadProgress, Error, RawResponse, RequestMethod, RequestSerializerType, Result,
    TransportAdapter, TransportError, TransportRequest,
};
use reqwest::header::{CONTENT_RANGE, HeaderValue, RANGE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("netkit/", env!("CARGO_PKG_VERSION"));

/// [`TransportAdapter`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Transport with a default client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Transport sharing an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Translate a transport request into a `reqwest::Request`
    pub fn build_request(
        &self,
        request: &TransportRequest,
    ) -> std::result::Result<reqwest::Request, TransportError> {
        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(auth) = &request.authorization {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        } else if let Some(argument) = &request.argument {
            if request.method.encodes_arguments_in_query() {
                builder = builder.query(&argument_pairs(argument)?);
            } else {
                builder = match request.serializer {
                    RequestSerializerType::Http => builder.form(&argument_pairs(argument)?),
                    RequestSerializerType::Json => builder.json(argument),
                };
            }
        }

        builder.build().map_err(|e| {
            TransportError::with_source(format!("Invalid request to {}", request.url), e)
        })
    }
}

#[async_trait]
impl TransportAdapter for ReqwestTransport {
    async fn execute(
        &self,
        request: &TransportRequest,
    ) -> std::result::Result<RawResponse, TransportError> {
        let mut http_request = self.build_request(request)?;
        let resume_from = match &request.download_path {
            Some(path) => partial_len(&partial_path(path)).await,
            None => 0,
        };
        if resume_from > 0 {
            let range = HeaderValue::from_str(&format!("bytes={resume_from}-"))
                .map_err(|e| TransportError::with_source("Invalid range header", e))?;
            http_request.headers_mut().insert(RANGE, range);
        }
        debug!(method = %request.method, url = %request.url, resume_from, "Sending request");

        let response = self.client.execute(http_request).await.map_err(failure)?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        trace!(status = status.as_u16(), "Response headers received");

        let body = match &request.download_path {
            Some(path) if status.is_success() => {
                let offset = if status == StatusCode::PARTIAL_CONTENT {
                    resume_from
                } else {
                    0
                };
                persist(response, path, offset, request.download_progress.as_ref()).await?;
                Bytes::new()
            }
            Some(path) if status == StatusCode::RANGE_NOT_SATISFIABLE && resume_from > 0 => {
                // The partial file no longer matches the resource
                let _ = tokio::fs::remove_file(partial_path(path)).await;
                response.bytes().await.map_err(failure)?
            }
            _ => response.bytes().await.map_err(failure)?,
        };

        Ok(RawResponse {
            status_code: status.as_u16(),
            headers,
            body,
        })
    }
}

const fn method(method: RequestMethod) -> Method {
    match method {
        RequestMethod::Get => Method::GET,
        RequestMethod::Post => Method::POST,
        RequestMethod::Head => Method::HEAD,
        RequestMethod::Put => Method::PUT,
        RequestMethod::Delete => Method::DELETE,
        RequestMethod::Patch => Method::PATCH,
    }
}

/// Flatten a JSON object into name/value pairs for query strings and forms.
///
/// Strings are used as-is, `null` becomes empty, nested values are sent as
/// JSON text.
fn argument_pairs(
    argument: &Value,
) -> std::result::Result<Vec<(String, String)>, TransportError> {
    let Value::Object(members) = argument else {
        return Err(TransportError::new(
            "Query and form arguments must be a JSON object",
        ));
    };
    Ok(members
        .iter()
        .map(|(name, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (name.clone(), text)
        })
        .collect())
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn failure(e: reqwest::Error) -> TransportError {
    let timed_out = e.is_timeout();
    let error = TransportError::with_source(format!("HTTP request failed: {e}"), e);
    if timed_out { error.timed_out() } else { error }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

async fn partial_len(partial: &Path) -> u64 {
    match tokio::fs::metadata(partial).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

/// Total length from a `Content-Range: bytes a-b/total` header
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.strip_prefix("bytes ")?.rsplit_once('/')?;
    total.parse().ok()
}

/// Stream the body into `path` through a sibling `.part` file.
///
/// With a non-zero `offset` the body continues the existing `.part` file;
/// otherwise the file starts over. An interrupted stream keeps the `.part`
/// file so the next attempt can resume it.
async fn persist(
    mut response: reqwest::Response,
    path: &Path,
    offset: u64,
    progress: Option<&DownloadProgress>,
) -> std::result::Result<(), TransportError> {
    let io = |action: &str, e: std::io::Error| {
        TransportError::with_source(format!("Failed to {action} {}", path.display()), e)
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io("create the directory for", e))?;
    }

    let total = if offset > 0 {
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .or_else(|| response.content_length().map(|len| len + offset))
    } else {
        response.content_length()
    };

    let partial = partial_path(path);
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(offset > 0)
        .truncate(offset == 0)
        .open(&partial)
        .await
        .map_err(|e| io("open", e))?;
    let mut written = offset;
    while let Some(chunk) = response.chunk().await.map_err(failure)? {
        file.write_all(&chunk).await.map_err(|e| io("write", e))?;
        written += chunk.len() as u64;
        if let Some(progress) = progress {
            progress.report(written, total);
        }
    }
    file.flush().await.map_err(|e| io("flush", e))?;
    drop(file);

    tokio::fs::rename(&partial, path)
        .await
        .map_err(|e| io("move download into", e))?;
    debug!(path = %path.display(), bytes = written, resumed_from = offset, "Download saved");
    Ok(())
}
