//! Network agent: the shared context requests run in

use crate::config::{Clock, NetworkConfig, SystemClock};
use crate::descriptor::RequestDescriptor;
use crate::dispatch::NotificationQueue;
use crate::error::{Error, Result};
use crate::request::{Request, RequestInner};
use crate::serializer::{DefaultSerializer, Serializer};
use crate::transport::TransportAdapter;
use netkit_cache::CacheStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

/// Owns the transport, serializer, cache store, clock and notification
/// queue shared by the requests it creates.
///
/// Cloning is cheap; clones share everything.
#[derive(Debug, Clone)]
pub struct NetworkAgent {
    inner: Arc<AgentInner>,
}

#[derive(Debug)]
struct AgentInner {
    transport: Arc<dyn TransportAdapter>,
    serializer: Arc<dyn Serializer>,
    clock: Arc<dyn Clock>,
    config: NetworkConfig,
    cache: CacheStore,
    runtime: Handle,
    notifications: NotificationQueue,
    running: Mutex<HashMap<Uuid, Weak<RequestInner>>>,
}

impl NetworkAgent {
    /// Start building an agent
    #[must_use]
    pub fn builder() -> NetworkAgentBuilder {
        NetworkAgentBuilder::default()
    }

    /// Create an idle request for `descriptor`
    pub fn request(&self, descriptor: impl RequestDescriptor) -> Request {
        self.request_from_arc(Arc::new(descriptor))
    }

    /// Create an idle request for a shared descriptor
    #[must_use]
    pub fn request_from_arc(&self, descriptor: Arc<dyn RequestDescriptor>) -> Request {
        Request::new(self.clone(), descriptor)
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Response cache
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Number of requests started and not yet settled
    #[must_use]
    pub fn running_request_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    /// Stop every running request
    pub fn cancel_all_requests(&self) {
        let running: Vec<Request> = self
            .inner
            .running
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .map(Request::from_inner)
            .collect();

        info!(count = running.len(), "Cancelling all requests");
        for request in running {
            request.stop();
        }
    }

    pub(crate) fn transport(&self) -> Arc<dyn TransportAdapter> {
        Arc::clone(&self.inner.transport)
    }

    pub(crate) fn serializer(&self) -> &dyn Serializer {
        &*self.inner.serializer
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        &*self.inner.clock
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    pub(crate) fn notifications(&self) -> &NotificationQueue {
        &self.inner.notifications
    }

    pub(crate) fn track(&self, request: &Request) {
        self.inner
            .running
            .lock()
            .insert(request.id(), request.downgrade());
    }

    pub(crate) fn untrack(&self, id: Uuid) {
        self.inner.running.lock().remove(&id);
    }
}

/// Builder for [`NetworkAgent`]
#[derive(Debug, Default)]
pub struct NetworkAgentBuilder {
    transport: Option<Arc<dyn TransportAdapter>>,
    serializer: Option<Arc<dyn Serializer>>,
    clock: Option<Arc<dyn Clock>>,
    config: NetworkConfig,
    runtime: Option<Handle>,
}

impl NetworkAgentBuilder {
    /// Transport adapter performing the HTTP exchanges (required)
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Body decoder; defaults to [`DefaultSerializer`]
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Time source for cache expiry; defaults to [`SystemClock`]
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Agent configuration
    #[must_use]
    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime for transport calls and notifications; defaults to the
    /// current one
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the agent.
    ///
    /// Fails without a transport, outside a tokio runtime when none was
    /// given, or when no cache directory can be resolved.
    pub fn build(self) -> Result<NetworkAgent> {
        let transport = self
            .transport
            .ok_or_else(|| Error::configuration("A transport adapter is required"))?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()
                .map_err(|e| Error::configuration(format!("No tokio runtime available: {e}")))?,
        };
        let cache = match &self.config.cache_dir {
            Some(dir) => CacheStore::new(dir),
            None => CacheStore::with_default_root()?,
        };
        debug!(cache_root = %cache.root().display(), "Network agent ready");

        let notifications = NotificationQueue::new(&runtime);
        Ok(NetworkAgent {
            inner: Arc::new(AgentInner {
                transport,
                serializer: self
                    .serializer
                    .unwrap_or_else(|| Arc::new(DefaultSerializer)),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                config: self.config,
                cache,
                runtime,
                notifications,
                running: Mutex::new(HashMap::new()),
            }),
        })
    }
}
