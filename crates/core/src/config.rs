//! Agent-wide configuration

use crate::descriptor::RequestDescriptor;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Rewrites a relative request URL before it is joined with the base URL
pub trait UrlFilter: Send + Sync + fmt::Debug {
    /// Return the URL to use for `request`
    fn filter_url(&self, url: &str, request: &dyn RequestDescriptor) -> String;
}

/// Appends fixed query arguments (e.g. client version, channel) to every URL
#[derive(Debug, Clone, Default)]
pub struct UrlArgumentsFilter {
    arguments: BTreeMap<String, String>,
}

impl UrlArgumentsFilter {
    /// Filter appending `arguments`
    pub fn new<K, V>(arguments: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl UrlFilter for UrlArgumentsFilter {
    fn filter_url(&self, url: &str, _request: &dyn RequestDescriptor) -> String {
        if self.arguments.is_empty() {
            return url.to_string();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.arguments)
            .finish();
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}{query}")
    }
}

/// Source of the current time for cache expiry
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settings shared by every request of an agent
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Host used when a descriptor has no base URL of its own
    pub base_url: String,
    /// CDN host used when a descriptor has no CDN URL of its own
    pub cdn_url: String,
    /// Response cache directory; resolved from the environment when absent
    pub cache_dir: Option<PathBuf>,
    /// Application version stamped into cache entries
    pub app_version: String,
    /// Applied in order to relative request URLs
    pub url_filters: Vec<Arc<dyn UrlFilter>>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cdn_url: String::new(),
            cache_dir: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            url_filters: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Start building a configuration
    #[must_use]
    pub fn builder() -> NetworkConfigBuilder {
        NetworkConfigBuilder::default()
    }
}

/// Builder for [`NetworkConfig`]
#[derive(Debug, Default)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
}

impl NetworkConfigBuilder {
    /// Set the default base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the default CDN URL
    #[must_use]
    pub fn cdn_url(mut self, url: impl Into<String>) -> Self {
        self.config.cdn_url = url.into();
        self
    }

    /// Use `dir` for cached responses
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Set the application version stamped into cache entries
    #[must_use]
    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.config.app_version = version.into();
        self
    }

    /// Append a URL filter
    #[must_use]
    pub fn url_filter(mut self, filter: Arc<dyn UrlFilter>) -> Self {
        self.config.url_filters.push(filter);
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> NetworkConfig {
        self.config
    }
}
