//! Caching, single-flight spec fetcher.
//!
//! Sits on top of [`RegistryClient`] and adds:
//! - a TTL cache keyed by api id (fresh hits never touch the network),
//! - single-flight coalescing (concurrent `get`s for one uncached id share
//!   a single outstanding fetch; every waiter sees the same outcome),
//! - stale-while-error (a failed refresh falls back to the stale entry and
//!   reports the degradation to the caller for logging).
//!
//! Parse failures are never cached.

use crate::client::RegistryClient;
use crate::error::{Result, SpecFetchError};
use futures::FutureExt as _;
use futures::future::Shared;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One fetched OpenAPI document plus the registry metadata callers need.
#[derive(Debug, Clone)]
pub struct ApiSpec {
    /// Registry identifier this document was fetched under.
    pub api_id: String,
    /// `info.title`, or the api id when the registry omitted it.
    pub title: String,
    /// `info.version`, or `"unknown"` when omitted.
    pub version: String,
    /// The raw document tree. Translation works on this.
    pub document: Value,
    /// When this instance was fetched (drives TTL expiry).
    pub fetched_at: Instant,
}

impl ApiSpec {
    /// Validate and wrap a raw registry document.
    ///
    /// Structural requirements are minimal: the document must be a JSON
    /// object with a `paths` object. Missing `info.title`/`info.version`
    /// degrade to defaults; the registry is untrusted input.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` when the document is not an object or has no
    /// `paths` object.
    pub fn from_document(api_id: String, document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(SpecFetchError::Parse {
                api_id,
                message: "document root is not a JSON object".to_string(),
            });
        }
        if document.get("paths").is_none_or(|p| !p.is_object()) {
            return Err(SpecFetchError::MissingField {
                api_id,
                field: "paths",
            });
        }

        let title = document
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or(&api_id)
            .to_string();
        let version = document
            .pointer("/info/version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            api_id,
            title,
            version,
            document,
            fetched_at: Instant::now(),
        })
    }
}

/// A successful `get`, possibly served stale.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub spec: Arc<ApiSpec>,
    /// Set when a refresh failed and the stale cached entry was returned
    /// instead; carries the fetch error text for the caller to log.
    pub degraded: Option<String>,
}

type FetchResult = std::result::Result<Arc<ApiSpec>, SpecFetchError>;
type SharedFetch = Shared<Pin<Box<dyn Future<Output = FetchResult> + Send>>>;

/// TTL cache + single-flight fetch coordinator.
///
/// Cheap to clone; clones share the cache and in-flight map.
#[derive(Clone)]
pub struct SpecFetcher {
    client: RegistryClient,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<String, Arc<ApiSpec>>>>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
}

impl SpecFetcher {
    #[must_use]
    pub fn new(client: RegistryClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the spec for `api_id`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns an error only when the fetch fails *and* no stale cached
    /// entry exists to fall back on.
    pub async fn get(&self, api_id: &str) -> Result<FetchOutcome> {
        if let Some(spec) = self.fresh(api_id) {
            return Ok(FetchOutcome {
                spec,
                degraded: None,
            });
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(api_id) {
                existing.clone()
            } else {
                let fetch = make_fetch(
                    self.client.clone(),
                    Arc::clone(&self.cache),
                    api_id.to_string(),
                );
                in_flight.insert(api_id.to_string(), fetch.clone());
                fetch
            }
        };

        let result = fetch.clone().await;

        // Clear the in-flight slot, but only if it still holds *this* fetch;
        // a later fetch may already have taken the slot.
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(api_id).is_some_and(|f| f.ptr_eq(&fetch)) {
                in_flight.remove(api_id);
            }
        }

        match result {
            Ok(spec) => Ok(FetchOutcome {
                spec,
                degraded: None,
            }),
            Err(err) => {
                let stale = self.cache.read().get(api_id).cloned();
                if let Some(spec) = stale {
                    tracing::warn!(api_id, error = %err, "spec refresh failed; serving stale entry");
                    Ok(FetchOutcome {
                        spec,
                        degraded: Some(err.to_string()),
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Drop the cached entry for `api_id`, forcing the next `get` to fetch.
    pub fn invalidate(&self, api_id: &str) {
        self.cache.write().remove(api_id);
    }

    fn fresh(&self, api_id: &str) -> Option<Arc<ApiSpec>> {
        let cache = self.cache.read();
        let spec = cache.get(api_id)?;
        (spec.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(spec))
    }
}

fn make_fetch(
    client: RegistryClient,
    cache: Arc<RwLock<HashMap<String, Arc<ApiSpec>>>>,
    api_id: String,
) -> SharedFetch {
    let fut = async move {
        let document = client.fetch_document(&api_id).await?;
        let spec = Arc::new(ApiSpec::from_document(api_id.clone(), document)?);
        cache.write().insert(api_id, Arc::clone(&spec));
        Ok(spec)
    };
    (Box::pin(fut) as Pin<Box<dyn Future<Output = FetchResult> + Send>>).shared()
}
