//! Lookaside caches over a shared [`CacheStore`].
//!
//! [`RenderCache`] sits in front of a [`PageRenderer`]: hits are served from
//! the backing store, misses are rendered and written back.
//! [`InventoryCache`] keeps downloaded inventories by URL. The store is
//! treated as opaque and possibly shared, so every key carries a namespace
//! and values are JSON.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use docbot_config::CacheConfig;

use crate::BoxFuture;
use crate::inventory::Inventory;
use crate::item::DocItem;
use crate::render::{PageRenderer, RenderError};

/// Errors from the backing store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("corrupt cache entry under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Async key/value store with per-entry TTL.
pub trait CacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, CacheError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<usize, CacheError>>;
}

/// In-process [`CacheStore`]. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, CacheError>> {
        Box::pin(async move {
            let mut entries = self.entries();
            let expired = match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => {
                    return Ok(Some(value.clone()));
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                entries.remove(key);
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries()
                .insert(key.to_string(), (value, Instant::now() + ttl));
            Ok(())
        })
    }

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<usize, CacheError>> {
        Box::pin(async move {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok(before - entries.len())
        })
    }
}

/// Stored value: rendered markup, or a tombstone for "nothing to render".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEntry {
    Rendered { markup: String },
    Missing,
}

/// Outcome of rendering a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Markup(String),
    /// The page had nothing to show for the symbol.
    Unavailable,
}

impl Rendered {
    /// Text to show the user.
    pub fn text(&self) -> &str {
        match self {
            Rendered::Markup(markup) => markup,
            Rendered::Unavailable => "Unable to parse the requested symbol.",
        }
    }
}

/// A render that failed; nothing was cached.
#[derive(Debug, thiserror::Error)]
pub enum RenderFailure {
    #[error("network error rendering {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("unexpected error rendering {url}: {reason}")]
    Unexpected { url: String, reason: String },
}

impl RenderFailure {
    /// Stable, user-facing description.
    pub fn user_message(&self) -> &'static str {
        match self {
            RenderFailure::Network { .. } => {
                "Unable to parse the requested symbol due to a network error."
            }
            RenderFailure::Unexpected { .. } => {
                "Unable to parse the requested symbol due to an error."
            }
        }
    }
}

/// Cache of rendered symbol content keyed by [`DocItem::cache_key`].
pub struct RenderCache {
    store: Arc<dyn CacheStore>,
    renderer: Arc<dyn PageRenderer>,
    namespace: String,
    ttl: Duration,
    negative_ttl: Duration,
}

impl RenderCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        renderer: Arc<dyn PageRenderer>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
            negative_ttl: config.negative_ttl(),
        }
    }

    fn store_key(&self, item: &DocItem) -> String {
        format!("{}:{}", self.namespace, item.cache_key())
    }

    /// Serve `item` from the cache, rendering and storing it on a miss.
    pub async fn get_or_render(&self, item: &DocItem) -> Result<Rendered, RenderFailure> {
        let key = self.store_key(item);

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(CacheEntry::Rendered { markup }) => return Ok(Rendered::Markup(markup)),
                Ok(CacheEntry::Missing) => return Ok(Rendered::Unavailable),
                Err(source) => {
                    let e = CacheError::Corrupt { key: key.clone(), source };
                    warn!(error = %e, "Ignoring corrupt cache entry");
                }
            },
            Ok(None) => debug!(%item, "Cache miss"),
            Err(e) => warn!(%item, error = %e, "Cache lookup failed; rendering directly"),
        }

        let url = item.url();
        let rendered = match self.renderer.render(&url, item.fragment_id()).await {
            Ok(rendered) => rendered,
            Err(RenderError::Network(reason)) => {
                warn!(%item, %reason, "A network error has occurred when requesting parsing");
                return Err(RenderFailure::Network { url, reason });
            }
            Err(RenderError::Parse(reason)) => {
                error!(%item, %reason, "An unexpected error has occurred when requesting parsing");
                return Err(RenderFailure::Unexpected { url, reason });
            }
        };

        let (entry, ttl, result) = match rendered {
            Some(markup) => (
                CacheEntry::Rendered {
                    markup: markup.clone(),
                },
                self.ttl,
                Rendered::Markup(markup),
            ),
            None => (CacheEntry::Missing, self.negative_ttl, Rendered::Unavailable),
        };
        self.write(&key, &entry, ttl).await;
        Ok(result)
    }

    async fn write(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        let value = match serde_json::to_string(entry) {
            Ok(value) => value,
            Err(e) => {
                error!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(key, value, ttl).await {
            warn!(key, error = %e, "Failed to store rendered symbol");
        }
    }

    /// Drop every cached render of `package`.
    pub async fn invalidate_package(&self, package: &str) -> Result<usize, CacheError> {
        let prefix = format!("{}:{package}:", self.namespace);
        let removed = self.store.delete_prefix(&prefix).await?;
        debug!(package, removed, "Invalidated cached renders");
        Ok(removed)
    }

    /// Drop every cached render of every package.
    pub async fn invalidate_all(&self) -> Result<usize, CacheError> {
        let prefix = format!("{}:", self.namespace);
        let removed = self.store.delete_prefix(&prefix).await?;
        debug!(removed, "Invalidated all cached renders");
        Ok(removed)
    }
}

/// Downloaded inventories keyed by their URL.
///
/// Lives beside the rendered entries in the same store, under a separate
/// prefix so package invalidation leaves it alone. A zero TTL disables it.
pub struct InventoryCache {
    store: Arc<dyn CacheStore>,
    namespace: String,
    ttl: Duration,
}

impl InventoryCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            ttl: config.inventory_ttl(),
        }
    }

    fn store_key(&self, url: &str) -> String {
        format!("{}.inventory:{url}", self.namespace)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// The cached inventory for `url`. Store errors count as a miss.
    pub async fn get(&self, url: &str) -> Option<Inventory> {
        if !self.is_enabled() {
            return None;
        }
        let key = self.store_key(url);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Inventory>(&raw) {
                Ok(inventory) => {
                    debug!(url, symbols = inventory.len(), "Using cached inventory");
                    Some(inventory)
                }
                Err(source) => {
                    let e = CacheError::Corrupt { key, source };
                    warn!(error = %e, "Ignoring corrupt cached inventory");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(url, error = %e, "Inventory cache lookup failed");
                None
            }
        }
    }

    pub async fn put(&self, url: &str, inventory: &Inventory) {
        if !self.is_enabled() {
            return;
        }
        let value = match serde_json::to_string(inventory) {
            Ok(value) => value,
            Err(e) => {
                error!(url, error = %e, "Failed to encode inventory");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.store_key(url), value, self.ttl).await {
            warn!(url, error = %e, "Failed to cache inventory");
        }
    }
}
