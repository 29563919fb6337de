//! Source adapter contract and host-keyed registry dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use flatwatch_core::Offer;
use thiserror::Error;
use url::Url;

pub mod fetch;
pub mod sites;

pub use fetch::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
pub use sites::{GratkaAdapter, MorizonAdapter, OlxAdapter, OtodomAdapter, TrojmiastoAdapter};

pub const CRATE_NAME: &str = "flatwatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector: {0}")]
    Selector(String),
    #[error("parse failure: {0}")]
    Parse(String),
}

/// One classified-ad portal. An adapter owns fetching and parsing for its
/// host; an empty offer list is a valid result, errors are reserved for
/// hard fetch/parse failures.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn host(&self) -> &'static str;

    async fn fetch(&self, http: &HttpFetcher, query: &Url) -> Result<Vec<Offer>, AdapterError>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid query url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("no adapter registered for host {host}")]
    UnknownSource { host: String },
    #[error("source {host} failed: {source}")]
    Adapter {
        host: String,
        source: AdapterError,
    },
}

/// Maps a query URL's host component to the adapter that can serve it.
/// Routing ignores scheme and query string; the registry itself performs no
/// I/O beyond delegating to the selected adapter.
pub struct SourceRegistry {
    adapters: HashMap<&'static str, Box<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn with_adapters(adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.host(), a)).collect(),
        }
    }

    /// Registry with all production portals registered.
    pub fn production() -> Self {
        Self::with_adapters(vec![
            Box::new(OlxAdapter),
            Box::new(OtodomAdapter),
            Box::new(TrojmiastoAdapter),
            Box::new(GratkaAdapter),
            Box::new(MorizonAdapter),
        ])
    }

    pub fn adapter_for_host(&self, host: &str) -> Option<&dyn SourceAdapter> {
        self.adapters.get(host).map(|a| a.as_ref())
    }

    pub fn hosts(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.adapters.keys().copied()
    }

    /// Route a query URL to its adapter and gather that source's offers.
    pub async fn gather(&self, http: &HttpFetcher, query: &str) -> Result<Vec<Offer>, RegistryError> {
        let url = Url::parse(query).map_err(|source| RegistryError::InvalidUrl {
            url: query.to_string(),
            source,
        })?;
        let host = url.host_str().unwrap_or_default().to_string();

        let Some(adapter) = self.adapter_for_host(&host) else {
            return Err(RegistryError::UnknownSource { host });
        };

        adapter
            .fetch(http, &url)
            .await
            .map_err(|source| RegistryError::Adapter { host, source })
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::production()
    }
}
