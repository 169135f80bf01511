//! The [`DocItem`] record and the string interner that backs it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One documentable symbol: which package it belongs to, what kind of
/// symbol it is, and where its documentation lives.
///
/// `group`, `base_url` and `relative_path` are shared between many items
/// (every symbol of a package has the same base URL, and a page typically
/// documents dozens of symbols), so they are reference-counted and interned
/// by the [`SymbolTable`](crate::symbols::SymbolTable) during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocItem {
    package: Arc<str>,
    group: Arc<str>,
    base_url: Arc<str>,
    relative_path: Arc<str>,
    fragment_id: String,
}

impl DocItem {
    pub fn new(
        package: impl Into<Arc<str>>,
        group: impl Into<Arc<str>>,
        base_url: impl Into<Arc<str>>,
        relative_path: impl Into<Arc<str>>,
        fragment_id: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            group: group.into(),
            base_url: base_url.into(),
            relative_path: relative_path.into(),
            fragment_id: fragment_id.into(),
        }
    }

    /// Canonical name of the owning package.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Role of the symbol, e.g. `class`, `method` or `label`.
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// In-page anchor of the symbol. May be empty.
    pub fn fragment_id(&self) -> &str {
        &self.fragment_id
    }

    /// Absolute URL of the page documenting the symbol, without fragment.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.relative_path)
    }

    /// Absolute URL pointing at the symbol itself.
    pub fn anchored_url(&self) -> String {
        if self.fragment_id.is_empty() {
            self.url()
        } else {
            format!("{}{}#{}", self.base_url, self.relative_path, self.fragment_id)
        }
    }

    /// Key shared by every symbol documented on the same page.
    pub fn page_key(&self) -> String {
        let path = self
            .relative_path
            .strip_suffix(".html")
            .unwrap_or(&self.relative_path);
        format!("{}:{}", self.package, path)
    }

    /// Deterministic cache key for this symbol's rendered content.
    ///
    /// Every key starts with `"{package}:"` so a package's entries can be
    /// dropped by prefix.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.page_key(), self.fragment_id)
    }
}

impl fmt::Display for DocItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.group, self.anchored_url(), self.package)
    }
}

/// Deduplicates shared strings so repeated groups and paths are stored once.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    strings: HashSet<Arc<str>>,
}

impl Interner {
    pub(crate) fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(s);
        self.strings.insert(Arc::clone(&interned));
        interned
    }

    pub(crate) fn clear(&mut self) {
        self.strings.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.strings.len()
    }
}
