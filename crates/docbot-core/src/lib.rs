#![deny(unsafe_code)]

//! Docbot documentation engine.
//!
//! Loads Sphinx inventories for a configured set of packages into a single
//! symbol namespace, resolves user queries against it, and renders the
//! matching documentation through a lookaside cache. Refreshes and lookups
//! are mutually exclusive; failed inventory downloads are retried in the
//! background.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send` boxed future, used as the return type of the
/// object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Rendered-content and inventory caches and their backing stores.
pub mod cache;
/// Public façade: resolve, complete, refresh, list.
pub mod engine;
/// Readers/refresh exclusion.
pub mod guard;
/// Inventory decoding and fetching.
pub mod inventory;
/// The `DocItem` record.
pub mod item;
/// Named admin locks.
pub mod locks;
/// Full refreshes and package retries.
pub mod refresh;
/// Page fetching and fragment conversion.
pub mod render;
/// Keyed delayed tasks.
pub mod scheduler;
/// Symbol table and name disambiguation.
pub mod symbols;

pub use cache::{
    CacheEntry, CacheError, CacheStore, InventoryCache, MemoryCacheStore, RenderCache, RenderFailure,
    Rendered,
};
pub use engine::{ALL_PACKAGES, DocEngine, EngineError, RefreshDiff, ResolvedSymbol};
pub use inventory::{HttpInventorySource, Inventory, InventoryEntry, InventoryError, InventorySource, decode_inventory};
pub use item::DocItem;
pub use refresh::{RefreshState, RefreshSummary};
pub use render::{ExcerptConverter, FragmentConverter, HttpPageRenderer, PageRenderer, RenderError};
pub use symbols::{NamingRules, RenamePolicy, SymbolTable};
