//! Full-catalog refreshes and per-package retries.
//!
//! A refresh fetches every configured inventory concurrently while lookups
//! are held at the gate, then swaps the table contents in one exclusive
//! section. Packages whose inventory could not be downloaded are retried on
//! their own later, first after `retry_first` and then every
//! `retry_repeated`, until they load or a newer refresh supersedes them.
//!
//! Downloaded inventories go through an [`InventoryCache`]; a refresh can
//! bypass it to force fresh downloads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use docbot_config::{DocsConfig, PackageConfig};

use crate::BoxFuture;
use crate::cache::{InventoryCache, RenderCache};
use crate::guard::RefreshGate;
use crate::inventory::{Inventory, InventoryError, InventorySource};
use crate::scheduler::RetryScheduler;
use crate::symbols::SymbolTable;

/// The symbol table together with everything that must stay consistent
/// with it.
pub struct Catalog {
    table: RwLock<SymbolTable>,
    gate: RefreshGate,
    cache: RenderCache,
}

impl Catalog {
    pub fn new(table: SymbolTable, cache: RenderCache) -> Self {
        Self {
            table: RwLock::new(table),
            gate: RefreshGate::new(),
            cache,
        }
    }

    pub fn gate(&self) -> &RefreshGate {
        &self.gate
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Read access to the table. Callers hold a [`ReadGuard`](crate::guard::ReadGuard)
    /// first so they never see a half-refreshed table.
    pub(crate) fn table(&self) -> RwLockReadGuard<'_, SymbolTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, SymbolTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether a full refresh is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// What happened to each package during a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Packages ingested, in configuration order.
    pub loaded: Vec<String>,
    /// Packages that could not be fetched and will be retried.
    pub rescheduled: Vec<String>,
    /// Packages with malformed inventories, skipped until the next refresh.
    pub failed: Vec<String>,
}

enum FetchOutcome {
    Loaded(Inventory),
    Retry(String),
    GiveUp,
}

impl FetchOutcome {
    fn classify(package: &PackageConfig, result: Result<Inventory, InventoryError>) -> Self {
        match result {
            Ok(inventory) if inventory.is_empty() => {
                FetchOutcome::Retry("inventory is empty".to_string())
            }
            Ok(inventory) => FetchOutcome::Loaded(inventory),
            Err(e @ InventoryError::Malformed { .. }) => {
                warn!(
                    package = %package.name,
                    url = %package.inventory_url,
                    error = %e,
                    "Invalid inventory; not rescheduling"
                );
                FetchOutcome::GiveUp
            }
            Err(e @ InventoryError::Unreachable { .. }) => FetchOutcome::Retry(e.to_string()),
        }
    }
}

/// Sets the refreshing flag for as long as it lives.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives refreshes and retries against a shared [`Catalog`].
pub struct RefreshScheduler {
    catalog: Arc<Catalog>,
    packages: Vec<PackageConfig>,
    source: Arc<dyn InventorySource>,
    inventories: InventoryCache,
    retries: RetryScheduler,
    retry_first: Duration,
    retry_repeated: Duration,
    generation: AtomicU64,
    refreshing: AtomicBool,
}

impl RefreshScheduler {
    pub fn new(
        catalog: Arc<Catalog>,
        config: &DocsConfig,
        source: Arc<dyn InventorySource>,
        inventories: InventoryCache,
    ) -> Self {
        Self {
            catalog,
            packages: config.packages.clone(),
            source,
            inventories,
            retries: RetryScheduler::new("inventory"),
            retry_first: config.retry_first(),
            retry_repeated: config.retry_repeated(),
            generation: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RefreshState {
        if self.refreshing.load(Ordering::SeqCst) {
            RefreshState::Refreshing
        } else {
            RefreshState::Idle
        }
    }

    /// Incremented by every refresh and by shutdown.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn packages(&self) -> &[PackageConfig] {
        &self.packages
    }

    /// Packages waiting for a retry, with the delay they were scheduled with.
    pub fn pending_retries(&self) -> BTreeMap<String, Duration> {
        self.retries.pending()
    }

    /// Reload every configured package. With `use_cache` unset every
    /// inventory is downloaded again.
    pub async fn refresh_all(self: &Arc<Self>, use_cache: bool) -> RefreshSummary {
        let gate = self.catalog.gate.close().await;
        let _flag = RefreshingFlag::raise(&self.refreshing);
        debug!(use_cache, "Refreshing documentation inventory...");

        self.retries.cancel_all();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let fetches = self
            .packages
            .iter()
            .map(|package| self.fetch(package, use_cache));
        let outcomes = join_all(fetches).await;

        gate.drain().await;
        // cancellation up to here leaves the previous table in place
        for package in &self.packages {
            self.invalidate(&package.name).await;
        }

        let mut summary = RefreshSummary::default();
        {
            let mut table = self.catalog.table_mut();
            table.clear();
            for (package, outcome) in self.packages.iter().zip(outcomes) {
                match outcome {
                    FetchOutcome::Loaded(inventory) => {
                        let count =
                            table.ingest(&package.name, &package.effective_base_url(), &inventory);
                        debug!(package = %package.name, symbols = count, "Fetched inventory");
                        summary.loaded.push(package.name.clone());
                    }
                    FetchOutcome::Retry(reason) => {
                        self.reschedule(package, generation, use_cache, &reason);
                        summary.rescheduled.push(package.name.clone());
                    }
                    FetchOutcome::GiveUp => summary.failed.push(package.name.clone()),
                }
            }
        }

        info!(
            generation,
            loaded = summary.loaded.len(),
            rescheduled = summary.rescheduled.len(),
            failed = summary.failed.len(),
            "Finished inventory refresh"
        );
        summary
    }

    async fn fetch(&self, package: &PackageConfig, use_cache: bool) -> FetchOutcome {
        let url = &package.inventory_url;
        if use_cache {
            if let Some(inventory) = self.inventories.get(url).await {
                return FetchOutcome::classify(package, Ok(inventory));
            }
        }
        let result = self.source.fetch(url).await;
        if let Ok(inventory) = &result {
            if !inventory.is_empty() {
                self.inventories.put(url, inventory).await;
            }
        }
        FetchOutcome::classify(package, result)
    }

    async fn invalidate(&self, package: &str) {
        if let Err(e) = self.catalog.cache.invalidate_package(package).await {
            warn!(package, error = %e, "Failed to invalidate cached renders");
        }
    }

    /// Schedule another attempt at `package`. A package that already has a
    /// retry registered (i.e. this is a retry failing again) backs off to
    /// the repeated delay.
    fn reschedule(
        self: &Arc<Self>,
        package: &PackageConfig,
        generation: u64,
        use_cache: bool,
        reason: &str,
    ) {
        let delay = if self.retries.cancel(&package.name) {
            self.retry_repeated
        } else {
            self.retry_first
        };
        info!(
            package = %package.name,
            reason,
            delay_secs = delay.as_secs(),
            "Failed to fetch inventory; attempting again later"
        );
        self.retries.schedule_later(
            &package.name,
            delay,
            Arc::clone(self).retry(package.clone(), generation, use_cache),
        );
    }

    fn retry(
        self: Arc<Self>,
        package: PackageConfig,
        generation: u64,
        use_cache: bool,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.generation() != generation {
                debug!(package = %package.name, "Skipping retry from superseded refresh");
                return;
            }
            match self.fetch(&package, use_cache).await {
                FetchOutcome::Loaded(inventory) => {
                    self.ingest_retried(&package, generation, &inventory).await;
                }
                FetchOutcome::Retry(reason) => {
                    if self.generation() == generation {
                        self.reschedule(&package, generation, use_cache, &reason);
                    }
                }
                FetchOutcome::GiveUp => {}
            }
        })
    }

    async fn ingest_retried(&self, package: &PackageConfig, generation: u64, inventory: &Inventory) {
        let _gate = self.catalog.gate.write().await;
        // a refresh may have completed while we waited for the gate
        if self.generation() != generation {
            debug!(package = %package.name, "Discarding retried inventory from superseded refresh");
            return;
        }
        self.invalidate(&package.name).await;
        let count =
            self.catalog
                .table_mut()
                .ingest(&package.name, &package.effective_base_url(), inventory);
        info!(package = %package.name, symbols = count, "Loaded inventory on retry");
    }

    /// Cancel all retries and make any retry already running a no-op.
    pub fn shutdown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.retries.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use docbot_config::CacheConfig;

    use super::*;
    use crate::cache::{InventoryCache, MemoryCacheStore};
    use crate::render::{PageRenderer, RenderError};
    use crate::symbols::NamingRules;

    struct MapSource(Mutex<HashMap<String, Result<Inventory, ()>>>);

    impl InventorySource for MapSource {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Inventory, InventoryError>> {
            let result = match self.0.lock().unwrap().get(url) {
                Some(Ok(inventory)) => Ok(inventory.clone()),
                Some(Err(())) => Err(InventoryError::Malformed {
                    url: url.to_string(),
                    reason: "bad header".to_string(),
                }),
                None => Err(InventoryError::Unreachable {
                    url: url.to_string(),
                    attempts: 1,
                    reason: "offline".to_string(),
                }),
            };
            Box::pin(async move { result })
        }
    }

    struct NoRender;

    impl PageRenderer for NoRender {
        fn render<'a>(
            &'a self,
            _url: &'a str,
            _fragment_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<String>, RenderError>> {
            Box::pin(async { Ok(None) })
        }
    }

    fn scheduler(source: Arc<MapSource>, packages: &[&str]) -> Arc<RefreshScheduler> {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = RenderCache::new(store.clone(), Arc::new(NoRender), &CacheConfig::default());
        let inventories = InventoryCache::new(store, &CacheConfig::default());
        let catalog = Arc::new(Catalog::new(SymbolTable::new(NamingRules::default()), cache));
        let config = DocsConfig {
            packages: packages
                .iter()
                .map(|name| PackageConfig::new(*name, format!("https://{name}.example/objects.inv")))
                .collect(),
            ..DocsConfig::default()
        };
        Arc::new(RefreshScheduler::new(catalog, &config, source, inventories))
    }

    fn inventory(name: &str) -> Inventory {
        Inventory::from_rows([("py:class", name, "index.html")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_classifies_packages() {
        let source = Arc::new(MapSource(Mutex::new(HashMap::from([
            ("https://good.example/objects.inv".to_string(), Ok(inventory("Good"))),
            ("https://bad.example/objects.inv".to_string(), Err(())),
            ("https://empty.example/objects.inv".to_string(), Ok(Inventory::new())),
        ]))));
        let refresh = scheduler(source, &["good", "bad", "empty", "down"]);

        let summary = refresh.refresh_all(false).await;
        assert_eq!(summary.loaded, vec!["good"]);
        assert_eq!(summary.failed, vec!["bad"]);
        assert_eq!(summary.rescheduled, vec!["empty", "down"]);
        assert_eq!(refresh.state(), RefreshState::Idle);
        assert_eq!(refresh.generation(), 1);

        let table = refresh.catalog.table();
        assert_eq!(table.get_exact("Good").unwrap().base_url(), "https://good.example/");
        assert_eq!(table.packages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_retries() {
        let refresh = scheduler(Arc::new(MapSource(Mutex::new(HashMap::new()))), &["down"]);
        refresh.refresh_all(false).await;
        assert_eq!(refresh.pending_retries().len(), 1);

        refresh.shutdown();
        assert!(refresh.pending_retries().is_empty());
        assert_eq!(refresh.generation(), 2);
    }

    #[tokio::test]
    async fn test_cached_inventory_is_reused_unless_bypassed() {
        let url = "https://python.example/objects.inv".to_string();
        let source = Arc::new(MapSource(Mutex::new(HashMap::from([(
            url.clone(),
            Ok(inventory("Old")),
        )]))));
        let refresh = scheduler(source.clone(), &["python"]);
        refresh.refresh_all(true).await;

        source.0.lock().unwrap().insert(url, Ok(inventory("New")));
        refresh.refresh_all(true).await;
        assert!(refresh.catalog.table().get_exact("Old").is_some());
        assert!(refresh.catalog.table().get_exact("New").is_none());

        refresh.refresh_all(false).await;
        assert!(refresh.catalog.table().get_exact("Old").is_none());
        assert!(refresh.catalog.table().get_exact("New").is_some());

        // the bypassing refresh stored what it downloaded
        refresh.refresh_all(true).await;
        assert!(refresh.catalog.table().get_exact("New").is_some());
    }
}
