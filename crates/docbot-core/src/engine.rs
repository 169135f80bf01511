//! The engine façade used by the command layer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use docbot_config::AppConfig;

use crate::cache::{
    CacheError, CacheStore, InventoryCache, MemoryCacheStore, RenderCache, RenderFailure, Rendered,
};
use crate::inventory::{HttpInventorySource, InventorySource};
use crate::item::DocItem;
use crate::locks::{LockError, ResourceLocks};
use crate::refresh::{Catalog, RefreshScheduler, RefreshState, RefreshSummary};
use crate::render::{HttpPageRenderer, PageRenderer};
use crate::symbols::{NamingRules, SymbolTable};

/// Lock namespace for documentation admin operations.
pub const LOCK_NAMESPACE: &str = "doc";
/// Lock guarding full refreshes.
pub const REFRESH_RESOURCE: &str = "inventory refresh";
/// Package name that addresses every package in [`DocEngine::clear_cache`].
pub const ALL_PACKAGES: &str = "*";

const FOOTER_WIDTH: usize = 200;

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("inventory refresh already in progress: {0}")]
    RefreshInProgress(#[source] LockError),

    #[error("admin operation rejected: {0}")]
    Locked(#[source] LockError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A symbol found by [`DocEngine::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// The name the symbol was found under (may be the query's first word).
    pub name: String,
    pub item: DocItem,
    pub content: Rendered,
    /// Other symbols that were renamed away from `name`.
    pub similar: Vec<String>,
}

impl ResolvedSymbol {
    /// "Similar names" line, shortened for display. `None` if there are none.
    pub fn footer(&self) -> Option<String> {
        if self.similar.is_empty() {
            return None;
        }
        let text = format!("Similar names: {}", self.similar.join(", "));
        Some(shorten(&text, FOOTER_WIDTH, " ..."))
    }
}

/// Collapse whitespace and, if still longer than `width`, drop trailing
/// words until the text plus `placeholder` fits.
fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let budget = width.saturating_sub(placeholder.chars().count());
    let mut out = String::new();
    for word in collapsed.split(' ') {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    format!("{out}{placeholder}").trim_start().to_string()
}

/// Package names added and removed by a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub summary: RefreshSummary,
}

/// Resolves symbols and manages the inventories behind them.
pub struct DocEngine {
    catalog: Arc<Catalog>,
    refresh: Arc<RefreshScheduler>,
    locks: ResourceLocks,
    completion_limit: usize,
    completion_threshold: u32,
}

impl DocEngine {
    pub fn new(
        config: &AppConfig,
        source: Arc<dyn InventorySource>,
        renderer: Arc<dyn PageRenderer>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let inventories = InventoryCache::new(Arc::clone(&store), &config.cache);
        let cache = RenderCache::new(store, renderer, &config.cache);
        let table = SymbolTable::new(NamingRules::from_config(&config.docs));
        let catalog = Arc::new(Catalog::new(table, cache));
        let refresh = Arc::new(RefreshScheduler::new(
            Arc::clone(&catalog),
            &config.docs,
            source,
            inventories,
        ));
        Self {
            catalog,
            refresh,
            locks: ResourceLocks::new(),
            completion_limit: config.docs.completion_limit,
            completion_threshold: config.docs.completion_threshold,
        }
    }

    /// Engine with HTTP fetching and an in-memory render cache.
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let source = Arc::new(HttpInventorySource::new(&config.http)?);
        let renderer = Arc::new(HttpPageRenderer::new(&config.http)?);
        Ok(Self::new(
            config,
            source,
            renderer,
            Arc::new(MemoryCacheStore::new()),
        ))
    }

    /// Look up `query` and render it.
    ///
    /// Waits for a running refresh to finish. Non-interactive queries that
    /// miss are retried with their first word. `Ok(None)` means no such
    /// symbol.
    pub async fn resolve(
        &self,
        query: &str,
        is_interactive: bool,
    ) -> Result<Option<ResolvedSymbol>, RenderFailure> {
        let query = query.trim().trim_matches('`');
        if query.is_empty() {
            return Ok(None);
        }
        trace!(query, is_interactive, "Resolving symbol");

        let _read = self.catalog.gate().read().await;
        let found = {
            let table = self.catalog.table();
            let (name, item) = if is_interactive {
                (query, table.get_exact(query))
            } else {
                table.lookup(query)
            };
            item.map(|item| {
                (
                    name.to_string(),
                    item.clone(),
                    table.similar_names(name).to_vec(),
                )
            })
        };
        let Some((name, item, similar)) = found else {
            debug!(query, "Symbol does not exist");
            return Ok(None);
        };

        let content = self.catalog.cache().get_or_render(&item).await?;
        Ok(Some(ResolvedSymbol {
            name,
            item,
            content,
            similar,
        }))
    }

    /// Reload every inventory. Fails immediately if another refresh holds
    /// the admin lock.
    ///
    /// Startup loads pass `use_cache = true` and accept inventories cached
    /// by an earlier download; admin refreshes pass `false` to fetch every
    /// inventory again.
    pub async fn refresh_all(&self, use_cache: bool) -> Result<RefreshDiff, EngineError> {
        let _lock = self
            .locks
            .try_acquire(LOCK_NAMESPACE, REFRESH_RESOURCE)
            .map_err(EngineError::RefreshInProgress)?;

        let before = self.package_names();
        let summary = self.refresh.refresh_all(use_cache).await;
        let after = self.package_names();

        let diff = RefreshDiff {
            added: after.difference(&before).cloned().collect(),
            removed: before.difference(&after).cloned().collect(),
            summary,
        };
        info!(added = ?diff.added, removed = ?diff.removed, "Inventories refreshed");
        Ok(diff)
    }

    fn package_names(&self) -> BTreeSet<String> {
        self.catalog.table().packages().keys().cloned().collect()
    }

    /// Loaded packages and their documentation roots.
    pub async fn list_packages(&self) -> BTreeMap<String, String> {
        let _read = self.catalog.gate().read().await;
        self.catalog.table().packages().clone()
    }

    /// Up to `limit` symbol names containing `query`, sorted.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<String> {
        let _read = self.catalog.gate().read().await;
        self.catalog
            .table()
            .search(query, limit)
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Completion candidates for a partially typed `query`, best first.
    pub async fn complete(&self, query: &str) -> Vec<String> {
        let _read = self.catalog.gate().read().await;
        self.catalog
            .table()
            .complete(query, self.completion_limit, self.completion_threshold)
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Direct children of symbol `name` in its own package.
    pub async fn attributes(&self, name: &str) -> Vec<String> {
        let _read = self.catalog.gate().read().await;
        self.catalog
            .table()
            .attributes(name)
            .into_iter()
            .map(|(child, _)| child.to_string())
            .collect()
    }

    /// Drop cached renders of `package`, or of every package for
    /// [`ALL_PACKAGES`].
    pub async fn clear_cache(&self, package: &str) -> Result<usize, EngineError> {
        let _lock = self
            .locks
            .try_acquire(LOCK_NAMESPACE, package)
            .map_err(EngineError::Locked)?;
        let removed = if package == ALL_PACKAGES {
            self.catalog.cache().invalidate_all().await?
        } else {
            self.catalog.cache().invalidate_package(package).await?
        };
        info!(package, removed, "Cleared cached renders");
        Ok(removed)
    }

    pub fn pending_retries(&self) -> BTreeMap<String, Duration> {
        self.refresh.pending_retries()
    }

    pub fn state(&self) -> RefreshState {
        self.refresh.state()
    }

    /// Cancel all scheduled retries.
    pub fn shutdown(&self) {
        debug!("Shutting down documentation engine");
        self.refresh.shutdown();
    }
}

impl Drop for DocEngine {
    fn drop(&mut self) {
        self.refresh.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn resolved(similar: Vec<String>) -> ResolvedSymbol {
        ResolvedSymbol {
            name: "Foo".to_string(),
            item: DocItem::new("A", "class", "https://a.example/", "a.html", "Foo"),
            content: Rendered::Unavailable,
            similar,
        }
    }

    #[test]
    fn test_footer_lists_similar_names() {
        assert_eq!(resolved(vec![]).footer(), None);
        assert_eq!(
            resolved(vec!["B.Foo".to_string(), "class.Foo".to_string()]).footer(),
            Some("Similar names: B.Foo, class.Foo".to_string())
        );
    }

    #[test]
    fn test_footer_is_shortened() {
        let similar: Vec<String> = (0..50).map(|i| format!("package{i}.Foo")).collect();
        let footer = resolved(similar).footer().unwrap();
        assert!(footer.chars().count() <= FOOTER_WIDTH);
        assert!(footer.ends_with(" ..."));
        assert!(footer.starts_with("Similar names: package0.Foo, package1.Foo,"));
    }

    #[test]
    fn test_shorten() {
        assert_eq!(shorten("a  b\tc", 10, " ..."), "a b c");
        assert_eq!(shorten("alpha beta gamma delta", 15, " ..."), "alpha beta ...");
    }
}
