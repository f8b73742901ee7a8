//! Request lifecycle controller.
//!
//! A [`Request`] ties a descriptor to the agent's transport, cache and
//! notification queue:
//!
//! ```text
//! Idle --start--> Running --success--> CompletedSuccess
//!                    |    --failure--> CompletedFailure
//!                    +-----stop------> Cancelled
//! ```
//!
//! `start` outside `Idle` and `stop` outside `Running` are no-ops. Each
//! terminal transition runs the completion pipeline exactly once: the
//! preprocessor on the worker that produced the result, then filter,
//! `will_stop`, delegate, callback and `did_stop` as one job on the agent's
//! notification queue.

use crate::accessory::{Accessory, AccessoryNotifier};
use crate::agent::NetworkAgent;
use crate::delegate::{Completion, RequestDelegate};
use crate::descriptor::RequestDescriptor;
use crate::error::{RequestError, Result, ValidationError};
use crate::serializer::ResponseObject;
use crate::transport::{DownloadProgress, RawResponse, build_transport_request, effective_host};
use crate::validator::validate_response;
use bytes::Bytes;
use netkit_cache::{CacheError, CacheExpectation, CacheKey, CacheKeyEnvelope, CacheMetadata};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Created, not started
    #[default]
    Idle,
    /// Waiting on the cache or the network
    Running,
    /// Finished with a usable response
    CompletedSuccess,
    /// Finished with an error
    CompletedFailure,
    /// Stopped before finishing
    Cancelled,
}

impl RequestState {
    /// Whether the request reached an end state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompletedSuccess | Self::CompletedFailure | Self::Cancelled
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::CompletedSuccess => "completed_success",
            Self::CompletedFailure => "completed_failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Response held by a settled request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status code
    pub status_code: u16,
    /// Header fields
    pub headers: BTreeMap<String, String>,
    /// Body bytes as received (or as cached)
    pub body: Bytes,
    /// Decoded body; `None` for download requests or undecodable bodies
    pub object: Option<ResponseObject>,
}

#[derive(Debug, Default)]
struct Core {
    state: RequestState,
    /// Set while `will_start` hooks run; a stop in that window defers its
    /// brackets to `begin`
    starting: bool,
    ignore_cache: bool,
    tag: i64,
    user_info: Option<Value>,
    accessories: AccessoryNotifier,
    delegate: Option<Weak<dyn RequestDelegate>>,
    completion: Option<Completion>,
    download_progress: Option<DownloadProgress>,
    response: Option<Response>,
    error: Option<Arc<RequestError>>,
    data_from_cache: bool,
    cancel: Option<CancellationToken>,
}

pub(crate) struct RequestInner {
    id: Uuid,
    descriptor: Arc<dyn RequestDescriptor>,
    agent: NetworkAgent,
    core: Mutex<Core>,
    settled: watch::Sender<bool>,
}

/// One request attempt.
///
/// Cloning is cheap and yields another handle to the same attempt.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn new(agent: NetworkAgent, descriptor: Arc<dyn RequestDescriptor>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: Uuid::new_v4(),
                descriptor,
                agent,
                core: Mutex::new(Core::default()),
                settled: watch::Sender::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RequestInner> {
        Arc::downgrade(&self.inner)
    }

    /// Unique id, also used as the `request_id` log field
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The descriptor this request was created from
    #[must_use]
    pub fn descriptor(&self) -> &dyn RequestDescriptor {
        &*self.inner.descriptor
    }

    // ---- lifecycle -------------------------------------------------------

    /// Start the request, serving it from the cache when a fresh, valid
    /// entry exists.
    ///
    /// A cache hit is delivered without touching the transport. Does nothing
    /// unless the request is `Idle`.
    pub fn start(&self) {
        self.begin(true);
    }

    /// Start the request without looking at the cache. A successful response
    /// is still written to it.
    pub fn start_without_cache(&self) {
        self.begin(false);
    }

    /// Set the completion pair, then [`start`](Self::start)
    pub fn start_with_completion(
        &self,
        success: impl Fn(&Self) + Send + Sync + 'static,
        failure: impl Fn(&Self) + Send + Sync + 'static,
    ) {
        self.set_completion(success, failure);
        self.start();
    }

    /// Cancel a running request.
    ///
    /// Accessories see `will_stop` and `did_stop` on the notification queue,
    /// always after `will_start`; the delegate and the completion callbacks
    /// are not called. A response that arrives later is dropped. Calling this
    /// outside `Running` does nothing.
    pub fn stop(&self) {
        let (token, deferred) = {
            let mut core = self.inner.core.lock();
            if core.state != RequestState::Running {
                return;
            }
            core.state = RequestState::Cancelled;
            core.delegate = None;
            core.completion = None;
            (core.cancel.take(), core.starting)
        };

        if let Some(token) = token {
            token.cancel();
        }
        info!(request_id = %self.id(), "Request cancelled");

        if !deferred {
            self.dispatch_cancel();
        }
    }

    /// Wait until the request settles and return its final state.
    ///
    /// A request that was never started resolves immediately as `Idle`.
    pub async fn wait(&self) -> RequestState {
        if self.state() == RequestState::Idle {
            return RequestState::Idle;
        }
        let mut settled = self.inner.settled.subscribe();
        let _ = settled.wait_for(|done| *done).await;
        self.state()
    }

    // ---- observers -------------------------------------------------------

    /// Replace the completion pair. The pair is consumed by the next terminal
    /// event.
    pub fn set_completion(
        &self,
        success: impl Fn(&Self) + Send + Sync + 'static,
        failure: impl Fn(&Self) + Send + Sync + 'static,
    ) {
        self.inner.core.lock().completion = Some(Completion::new(success, failure));
    }

    /// Drop the completion pair
    pub fn clear_completion(&self) {
        self.inner.core.lock().completion = None;
    }

    /// Append an accessory. Accessories added after `start` may miss
    /// `will_start`.
    pub fn add_accessory(&self, accessory: Accessory) {
        debug!(request_id = %self.id(), accessory = accessory.name(), "Accessory added");
        self.inner.core.lock().accessories.push(accessory);
    }

    /// Observe outcomes through `delegate`, held weakly
    pub fn set_delegate(&self, delegate: &Arc<dyn RequestDelegate>) {
        self.inner.core.lock().delegate = Some(Arc::downgrade(delegate));
    }

    /// Forget the delegate
    pub fn clear_delegate(&self) {
        self.inner.core.lock().delegate = None;
    }

    /// Observe a download's progress as bytes written and expected total.
    /// Ignored unless the descriptor names a `resumable_download_path`.
    pub fn set_download_progress(
        &self,
        observer: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) {
        self.inner.core.lock().download_progress = Some(DownloadProgress::new(observer));
    }

    // ---- flags and user data ---------------------------------------------

    /// Skip cache reads for this request; successful responses are still
    /// written
    pub fn set_ignore_cache(&self, ignore: bool) {
        self.inner.core.lock().ignore_cache = ignore;
    }

    /// Whether cache reads are skipped
    #[must_use]
    pub fn ignores_cache(&self) -> bool {
        self.inner.core.lock().ignore_cache
    }

    /// Caller-defined tag
    #[must_use]
    pub fn tag(&self) -> i64 {
        self.inner.core.lock().tag
    }

    /// Set the caller-defined tag
    pub fn set_tag(&self, tag: i64) {
        self.inner.core.lock().tag = tag;
    }

    /// Caller-defined data carried with the request
    #[must_use]
    pub fn user_info(&self) -> Option<Value> {
        self.inner.core.lock().user_info.clone()
    }

    /// Attach caller-defined data
    pub fn set_user_info(&self, info: Option<Value>) {
        self.inner.core.lock().user_info = info;
    }

    // ---- state and response ----------------------------------------------

    /// Current state
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.inner.core.lock().state
    }

    /// Whether `stop` cancelled the request
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == RequestState::Cancelled
    }

    /// Whether the request is waiting on the cache or the network
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state() == RequestState::Running
    }

    /// Whether the response was served from the cache
    #[must_use]
    pub fn is_data_from_cache(&self) -> bool {
        self.inner.core.lock().data_from_cache
    }

    /// The response, once one is available
    #[must_use]
    pub fn response(&self) -> Option<Response> {
        self.inner.core.lock().response.clone()
    }

    /// Response status code
    #[must_use]
    pub fn response_status_code(&self) -> Option<u16> {
        self.inner.core.lock().response.as_ref().map(|r| r.status_code)
    }

    /// Response header fields; empty without a response
    #[must_use]
    pub fn response_headers(&self) -> BTreeMap<String, String> {
        self.inner
            .core
            .lock()
            .response
            .as_ref()
            .map(|r| r.headers.clone())
            .unwrap_or_default()
    }

    /// Response body bytes
    #[must_use]
    pub fn response_data(&self) -> Option<Bytes> {
        self.inner.core.lock().response.as_ref().map(|r| r.body.clone())
    }

    /// Response body as text, with invalid UTF-8 replaced
    #[must_use]
    pub fn response_string(&self) -> Option<String> {
        self.response_data()
            .map(|body| String::from_utf8_lossy(&body).into_owned())
    }

    /// Decoded response body
    #[must_use]
    pub fn response_object(&self) -> Option<ResponseObject> {
        self.inner
            .core
            .lock()
            .response
            .as_ref()
            .and_then(|r| r.object.clone())
    }

    /// Decoded body, if it is JSON
    #[must_use]
    pub fn response_json(&self) -> Option<Value> {
        self.response_object()
            .and_then(|object| object.as_json().cloned())
    }

    /// Why the request failed
    #[must_use]
    pub fn error(&self) -> Option<Arc<RequestError>> {
        self.inner.core.lock().error.clone()
    }

    // ---- cache -----------------------------------------------------------

    /// Key addressing this request's cache entry.
    ///
    /// Derived from method, host, URL and the filtered argument. Custom
    /// requests contribute their own method, URL and body digest.
    pub fn cache_key(&self) -> Result<CacheKey> {
        let descriptor = self.descriptor();
        let argument = descriptor
            .cache_file_name_filter_for_request_argument(descriptor.request_argument());

        let envelope = match descriptor.build_custom_url_request() {
            Some(custom) => {
                let envelope = CacheKeyEnvelope {
                    method: custom.method.as_str().to_string(),
                    host: String::new(),
                    url: custom.url,
                    argument,
                };
                match &custom.body {
                    Some(body) => envelope.with_body(body),
                    None => envelope,
                }
            }
            None => CacheKeyEnvelope {
                method: descriptor.request_method().as_str().to_string(),
                host: effective_host(descriptor, self.inner.agent.config()),
                url: descriptor.request_url(),
                argument,
            },
        };
        Ok(CacheKey::derive(&envelope)?)
    }

    /// Load the cached response into this request.
    ///
    /// On success the response is readable through the accessors and
    /// [`is_data_from_cache`](Self::is_data_from_cache) is set. The error
    /// names the first check that rejected the entry.
    pub fn load_cache(&self) -> std::result::Result<(), CacheError> {
        let response = self.read_cache()?;
        let mut core = self.inner.core.lock();
        core.response = Some(response);
        core.data_from_cache = true;
        Ok(())
    }

    /// Store `data` as this request's cached response, stamped with the
    /// descriptor's current version and sensitive data.
    pub fn save_response_data_to_cache_file(&self, data: &[u8]) -> Result<()> {
        let key = self.cache_key()?;
        let metadata = self.new_metadata();
        self.inner.agent.cache().save(&key, data, &metadata)?;
        Ok(())
    }

    fn expectation(&self) -> CacheExpectation {
        let descriptor = self.descriptor();
        CacheExpectation {
            max_age_seconds: descriptor.cache_time_in_seconds(),
            version: descriptor.cache_version(),
            sensitive_data: descriptor.cache_sensitive_data(),
            app_version: self.inner.agent.config().app_version.clone(),
        }
    }

    fn new_metadata(&self) -> CacheMetadata {
        let descriptor = self.descriptor();
        CacheMetadata::new(
            descriptor.cache_version(),
            descriptor.cache_sensitive_data(),
            self.inner.agent.config().app_version.clone(),
            self.inner.agent.clock().now(),
        )
    }

    fn read_cache(&self) -> std::result::Result<Response, CacheError> {
        let key = self
            .cache_key()
            .map_err(|e| CacheError::invalid_metadata(format!("cache key: {e}")))?;
        let now = self.inner.agent.clock().now();
        let entry = self.inner.agent.cache().load(&key, &self.expectation(), now)?;

        let body = Bytes::from(entry.payload);
        let object = self
            .inner
            .agent
            .serializer()
            .parse(&body, self.descriptor().response_serializer_type())
            .map_err(|e| CacheError::invalid_data(e.to_string()))?;

        Ok(Response {
            status_code: entry.metadata.status_code.unwrap_or(200),
            headers: entry.metadata.headers,
            body,
            object: Some(object),
        })
    }

    fn reads_cache(&self) -> bool {
        let descriptor = self.descriptor();
        descriptor.cache_time_in_seconds() > 0 && descriptor.resumable_download_path().is_none()
    }

    // ---- pipeline --------------------------------------------------------

    fn begin(&self, use_cache: bool) {
        let (accessories, ignore_cache, token) = {
            let mut core = self.inner.core.lock();
            if core.state != RequestState::Idle {
                debug!(
                    request_id = %self.id(),
                    state = %core.state,
                    "Ignoring start of a request that is not idle"
                );
                return;
            }
            core.state = RequestState::Running;
            core.starting = true;
            let token = CancellationToken::new();
            core.cancel = Some(token.clone());
            // Tracked before anyone can observe Running, so untrack always
            // follows track
            self.inner.agent.track(self);
            (core.accessories.clone(), core.ignore_cache, token)
        };

        debug!(
            request_id = %self.id(),
            url = %self.descriptor().request_url(),
            accessories = accessories.len(),
            "Starting request"
        );
        accessories.will_start(self);

        let stopped = {
            let mut core = self.inner.core.lock();
            core.starting = false;
            core.state != RequestState::Running
        };
        // Stopped from a will_start hook or another thread
        if stopped {
            self.dispatch_cancel();
            return;
        }

        if use_cache && !ignore_cache && self.reads_cache() {
            match self.usable_cache_hit() {
                Ok(response) => {
                    self.finish_from_cache(response);
                    return;
                }
                Err(reason) => {
                    debug!(request_id = %self.id(), %reason, "Cache miss");
                }
            }
        }

        self.spawn_network(token);
    }

    fn usable_cache_hit(&self) -> std::result::Result<Response, String> {
        let response = self.read_cache().map_err(|e| e.to_string())?;
        validate_response(
            self.descriptor(),
            response.status_code,
            response.object.as_ref(),
        )
        .map_err(|e| format!("cached response rejected: {e}"))?;
        Ok(response)
    }

    fn finish_from_cache(&self, response: Response) {
        {
            let mut core = self.inner.core.lock();
            if core.state != RequestState::Running {
                return;
            }
            core.state = RequestState::CompletedSuccess;
            core.data_from_cache = true;
            core.response = Some(response);
            core.cancel = None;
        }
        info!(request_id = %self.id(), "Served from cache");

        self.run_hook("request_complete_preprocessor", |d, r| {
            d.request_complete_preprocessor(r);
        });
        self.dispatch(true);
    }

    fn spawn_network(&self, token: CancellationToken) {
        let request = self.clone();
        self.inner.agent.runtime().spawn(async move {
            let outcome = match build_transport_request(
                request.descriptor(),
                request.inner.agent.config(),
            ) {
                Ok(mut transport_request) => {
                    if transport_request.download_path.is_some() {
                        transport_request.download_progress =
                            request.inner.core.lock().download_progress.clone();
                    }
                    let transport = request.inner.agent.transport();
                    tokio::select! {
                        biased;
                        () = token.cancelled() => {
                            debug!(request_id = %request.id(), "Transport call abandoned");
                            return;
                        }
                        result = transport.execute(&transport_request) => {
                            result.map_err(RequestError::from)
                        }
                    }
                }
                Err(e) => Err(RequestError::Build(e)),
            };
            request.complete(outcome).await;
        });
    }

    async fn complete(&self, outcome: std::result::Result<RawResponse, RequestError>) {
        let (response, verdict) = match outcome {
            Ok(raw) => {
                let (response, verdict) = self.interpret(raw);
                (Some(response), verdict)
            }
            Err(e) => (None, Err(e)),
        };
        let success = verdict.is_ok();

        {
            let mut core = self.inner.core.lock();
            if core.state != RequestState::Running {
                debug!(request_id = %self.id(), "Dropping result of a stopped request");
                return;
            }
            core.state = if success {
                RequestState::CompletedSuccess
            } else {
                RequestState::CompletedFailure
            };
            core.response.clone_from(&response);
            core.error = verdict.err().map(Arc::new);
            core.data_from_cache = false;
            core.cancel = None;
        }

        if success {
            info!(
                request_id = %self.id(),
                status = response.as_ref().map(|r| r.status_code),
                "Request succeeded"
            );
            if let Some(response) = response
                && self.descriptor().writes_cache()
            {
                self.write_cache(response).await;
            }
            self.run_hook("request_complete_preprocessor", |d, r| {
                d.request_complete_preprocessor(r);
            });
        } else {
            if let Some(error) = self.error() {
                warn!(request_id = %self.id(), %error, "Request failed");
            }
            self.run_hook("request_failed_preprocessor", |d, r| {
                d.request_failed_preprocessor(r);
            });
        }

        self.dispatch(success);
    }

    fn interpret(&self, raw: RawResponse) -> (Response, std::result::Result<(), RequestError>) {
        let descriptor = self.descriptor();
        let mut response = Response {
            status_code: raw.status_code,
            headers: raw.headers,
            body: raw.body,
            object: None,
        };

        // Error pages are rarely in the declared format
        if !descriptor.status_code_validator(response.status_code) {
            let status_code = response.status_code;
            return (
                response,
                Err(ValidationError::InvalidStatusCode { status_code }.into()),
            );
        }
        if descriptor.resumable_download_path().is_some() {
            return (response, Ok(()));
        }

        match self
            .inner
            .agent
            .serializer()
            .parse(&response.body, descriptor.response_serializer_type())
        {
            Ok(object) => response.object = Some(object),
            Err(e) => return (response, Err(e.into())),
        }

        let verdict = validate_response(descriptor, response.status_code, response.object.as_ref())
            .map_err(RequestError::from);
        (response, verdict)
    }

    async fn write_cache(&self, response: Response) {
        let key = match self.cache_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(request_id = %self.id(), error = %e, "Cannot derive cache key");
                return;
            }
        };
        let metadata = self
            .new_metadata()
            .with_response(response.status_code, response.headers);
        let store = self.inner.agent.cache().clone();
        let request_id = self.id();

        let write = tokio::task::spawn_blocking(move || {
            if let Err(e) = store.save(&key, &response.body, &metadata) {
                warn!(%request_id, cache_key = %key, error = %e, "Failed to write cache entry");
            }
        });

        if !self.descriptor().write_cache_asynchronously()
            && let Err(e) = write.await
        {
            warn!(%request_id, error = %e, "Cache write task failed");
        }
    }

    fn dispatch(&self, success: bool) {
        let request = self.clone();
        self.inner
            .agent
            .notifications()
            .submit(move || request.deliver(success));
    }

    fn deliver(&self, success: bool) {
        if success {
            self.run_hook("request_complete_filter", |d, r| d.request_complete_filter(r));
        } else {
            self.run_hook("request_failed_filter", |d, r| d.request_failed_filter(r));
        }

        let (accessories, delegate, completion) = {
            let mut core = self.inner.core.lock();
            (
                core.accessories.clone(),
                core.delegate.as_ref().and_then(Weak::upgrade),
                core.completion.take(),
            )
        };

        accessories.will_stop(self);
        if let Some(delegate) = delegate {
            self.guard("delegate", || {
                if success {
                    delegate.request_finished(self);
                } else {
                    delegate.request_failed(self);
                }
            });
        }
        if let Some(completion) = completion {
            let callback = completion.for_outcome(success);
            self.guard("completion", || callback(self));
        }
        accessories.did_stop(self);

        self.settle();
    }

    /// Queue the `will_stop`/`did_stop` brackets of a cancelled request
    fn dispatch_cancel(&self) {
        let accessories = self.inner.core.lock().accessories.clone();
        if accessories.is_empty() {
            self.settle();
            return;
        }
        let request = self.clone();
        self.inner.agent.notifications().submit(move || {
            accessories.will_stop(&request);
            accessories.did_stop(&request);
            request.settle();
        });
    }

    fn settle(&self) {
        self.inner.agent.untrack(self.id());
        self.inner.settled.send_replace(true);
    }

    fn run_hook(&self, hook: &'static str, f: impl FnOnce(&dyn RequestDescriptor, &Self)) {
        self.guard(hook, || f(self.descriptor(), self));
    }

    fn guard(&self, hook: &'static str, f: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            warn!(request_id = %self.id(), hook, "Request hook panicked");
        }
    }
}

