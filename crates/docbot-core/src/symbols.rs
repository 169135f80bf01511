//! The symbol table and its name disambiguation rules.
//!
//! Every package's inventory is ingested into one flat namespace. When two
//! symbols want the same name, one of them is moved to a qualified name
//! (`package.name`, `group.name`, or the fully qualified
//! `package.group.name`) and the move is recorded in `renamed` so it can be
//! shown to users as "similar names".

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use docbot_config::DocsConfig;

use crate::inventory::Inventory;
use crate::item::{DocItem, Interner};

/// Package and group precedence used when resolving name conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingRules {
    priority_packages: Vec<String>,
    force_prefix_groups: Vec<String>,
}

impl NamingRules {
    pub fn new(priority_packages: Vec<String>, force_prefix_groups: Vec<String>) -> Self {
        Self {
            priority_packages,
            force_prefix_groups,
        }
    }

    pub fn from_config(config: &DocsConfig) -> Self {
        Self::new(
            config.priority_packages.clone(),
            config.force_prefix_groups.clone(),
        )
    }

    fn is_priority(&self, package: &str) -> bool {
        self.priority_packages.iter().any(|p| p == package)
    }

    /// Position of `group` in the force-prefix list; lower ranks higher.
    fn force_prefix_rank(&self, group: &str) -> Option<usize> {
        self.force_prefix_groups.iter().position(|g| g == group)
    }
}

/// Which of two conflicting symbols is moved, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenamePolicy {
    /// The incoming symbol belongs to a priority package: the incumbent is
    /// moved under its own package name.
    PriorityPackage,
    /// The incoming symbol belongs to another, non-priority package: it is
    /// qualified by its package name.
    ForeignPackage,
    /// Same package and the incoming group is a force-prefix group. The
    /// incumbent is displaced only when its own group is a lower ranked
    /// force-prefix group.
    ForcePrefixGroup { displace_incumbent: bool },
    /// Same package, no force-prefix preference: the incumbent is qualified
    /// by its group.
    GroupTieBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenameTarget {
    Incumbent,
    Incoming,
}

impl RenamePolicy {
    /// Decide how a conflict between `incumbent` and an incoming symbol of
    /// `package`/`group` is resolved.
    pub fn decide(rules: &NamingRules, incumbent: &DocItem, package: &str, group: &str) -> Self {
        if package != incumbent.package() {
            return if rules.is_priority(package) {
                RenamePolicy::PriorityPackage
            } else {
                RenamePolicy::ForeignPackage
            };
        }
        match rules.force_prefix_rank(group) {
            Some(incoming_rank) => {
                let displace_incumbent = rules
                    .force_prefix_rank(incumbent.group())
                    .is_some_and(|incumbent_rank| incoming_rank < incumbent_rank);
                RenamePolicy::ForcePrefixGroup { displace_incumbent }
            }
            None => RenamePolicy::GroupTieBreak,
        }
    }

    fn target(self) -> RenameTarget {
        match self {
            RenamePolicy::PriorityPackage
            | RenamePolicy::GroupTieBreak
            | RenamePolicy::ForcePrefixGroup {
                displace_incumbent: true,
            } => RenameTarget::Incumbent,
            RenamePolicy::ForeignPackage
            | RenamePolicy::ForcePrefixGroup {
                displace_incumbent: false,
            } => RenameTarget::Incoming,
        }
    }

    /// First-choice qualifier for the moved symbol.
    fn prefix<'a>(self, incumbent: &'a DocItem, incoming: &'a DocItem) -> &'a str {
        match self {
            RenamePolicy::PriorityPackage => incumbent.package(),
            RenamePolicy::ForeignPackage => incoming.package(),
            RenamePolicy::ForcePrefixGroup { displace_incumbent } => {
                if displace_incumbent {
                    incumbent.group()
                } else {
                    incoming.group()
                }
            }
            RenamePolicy::GroupTieBreak => incumbent.group(),
        }
    }
}

/// Name → [`DocItem`] mapping for every loaded package.
///
/// Not internally synchronized; callers go through the refresh gate.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, DocItem>,
    renamed: HashMap<String, Vec<String>>,
    base_urls: BTreeMap<String, String>,
    interner: Interner,
    rules: NamingRules,
}

impl SymbolTable {
    pub fn new(rules: NamingRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// Add every symbol of `package`'s inventory, renaming on conflict.
    ///
    /// Returns the number of symbols stored.
    pub fn ingest(&mut self, package: &str, base_url: &str, inventory: &Inventory) -> usize {
        self.base_urls
            .insert(package.to_string(), base_url.to_string());

        let package_name = self.interner.intern(package);
        let base = self.interner.intern(base_url);
        let mut stored = 0;

        for (group_path, entry) in inventory.rows() {
            // e.g. `class` from `py:class`
            let group_name = group_path
                .split_once(':')
                .map_or(group_path, |(_, group)| group);
            let (relative_path, fragment_id) = entry
                .location
                .split_once('#')
                .unwrap_or((entry.location.as_str(), ""));

            let item = DocItem::new(
                package_name.clone(),
                self.interner.intern(group_name),
                base.clone(),
                self.interner.intern(relative_path),
                fragment_id,
            );
            let name = self.ensure_unique_name(&item, &entry.name);
            trace!(symbol = %name, %item, "Ingested symbol");
            self.symbols.insert(name, item);
            stored += 1;
        }

        stored
    }

    /// Pick the name `item` will be stored under, moving the incumbent if
    /// the conflict policy says so.
    fn ensure_unique_name(&mut self, item: &DocItem, symbol_name: &str) -> String {
        let Some(incumbent) = self.symbols.get(symbol_name) else {
            return symbol_name.to_string();
        };

        let policy = RenamePolicy::decide(&self.rules, incumbent, item.package(), item.group());
        let target = policy.target();
        let moved = match target {
            RenameTarget::Incumbent => incumbent.clone(),
            RenameTarget::Incoming => item.clone(),
        };

        let mut new_name = format!("{}.{symbol_name}", policy.prefix(incumbent, item));
        if self.symbols.contains_key(&new_name) {
            new_name = self.vacant_name(
                format!("{}.{}.{symbol_name}", moved.package(), moved.group()),
                &moved,
            );
        }
        trace!(symbol = symbol_name, renamed_to = %new_name, ?policy, "Resolved name conflict");

        self.renamed
            .entry(symbol_name.to_string())
            .or_default()
            .push(new_name.clone());

        match target {
            RenameTarget::Incumbent => {
                self.symbols.insert(new_name, moved);
                symbol_name.to_string()
            }
            RenameTarget::Incoming => new_name,
        }
    }

    /// `candidate`, or `candidate_N` for the smallest `N >= 2` that is free
    /// or already holds `identity`.
    fn vacant_name(&self, candidate: String, identity: &DocItem) -> String {
        let holds = |name: &str| {
            self.symbols
                .get(name)
                .is_some_and(|existing| existing != identity)
        };
        if !holds(&candidate) {
            return candidate;
        }
        let mut n = 2;
        loop {
            let name = format!("{candidate}_{n}");
            if !holds(&name) {
                return name;
            }
            n += 1;
        }
    }

    /// Resolve `query`, falling back to its first word when the whole query
    /// is unknown. Returns the name actually looked up.
    pub fn lookup<'q>(&self, query: &'q str) -> (&'q str, Option<&DocItem>) {
        if let Some(item) = self.symbols.get(query) {
            return (query, Some(item));
        }
        match query.split_once(' ') {
            Some((first, _)) => (first, self.symbols.get(first)),
            None => (query, None),
        }
    }

    /// Exact match only.
    pub fn get_exact(&self, name: &str) -> Option<&DocItem> {
        self.symbols.get(name)
    }

    /// Names that were moved away from `name` because of conflicts.
    pub fn similar_names(&self, name: &str) -> &[String] {
        self.renamed.get(name).map_or(&[], Vec::as_slice)
    }

    /// Up to `limit` symbol names containing `query`, sorted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<&str> {
        let mut matches: Vec<&str> = self
            .symbols
            .keys()
            .map(String::as_str)
            .filter(|name| name.contains(query))
            .collect();
        matches.sort_unstable();
        matches.truncate(limit);
        matches
    }

    /// Fuzzy completions for a partially typed `query`, best first.
    ///
    /// Names are ranked by edit similarity to the query on a 0-100 scale and
    /// the `limit` best are kept. Those get +50 when they equal the query
    /// ignoring case and +20 when they contain it ignoring case; any scoring
    /// below `threshold` are dropped.
    pub fn complete(&self, query: &str, limit: usize, threshold: u32) -> Vec<&str> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let by_score = |a: &(&str, f64), b: &(&str, f64)| b.1.total_cmp(&a.1).then(a.0.cmp(b.0));
        let mut scored: Vec<(&str, f64)> = self
            .symbols
            .keys()
            .map(|name| (name.as_str(), strsim::normalized_levenshtein(query, name) * 100.0))
            .collect();
        scored.sort_unstable_by(by_score);
        scored.truncate(limit);

        let lower_query = query.to_lowercase();
        for (name, score) in &mut scored {
            let lower = name.to_lowercase();
            if lower == lower_query {
                *score += 50.0;
            }
            if lower.contains(&lower_query) {
                *score += 20.0;
            }
        }
        scored.sort_unstable_by(by_score);

        scored
            .into_iter()
            .take_while(|(_, score)| *score >= f64::from(threshold))
            .map(|(name, _)| name)
            .collect()
    }

    /// Direct children of `name` from the same package, sorted by name.
    pub fn attributes(&self, name: &str) -> Vec<(&str, &DocItem)> {
        let Some(parent) = self.symbols.get(name) else {
            return Vec::new();
        };
        let mut children: Vec<(&str, &DocItem)> = self
            .symbols
            .iter()
            .filter(|(child, item)| {
                item.package() == parent.package()
                    && child
                        .strip_prefix(name)
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|segment| !segment.is_empty() && !segment.contains('.'))
            })
            .map(|(child, item)| (child.as_str(), item))
            .collect();
        children.sort_unstable_by_key(|(child, _)| *child);
        children
    }

    pub fn base_url(&self, package: &str) -> Option<&str> {
        self.base_urls.get(package).map(String::as_str)
    }

    /// Loaded packages and their documentation roots.
    pub fn packages(&self) -> &BTreeMap<String, String> {
        &self.base_urls
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Drop every symbol, rename record and package.
    pub fn clear(&mut self) {
        self.symbols.clear();
        self.renamed.clear();
        self.base_urls.clear();
        self.interner.clear();
    }

    #[cfg(test)]
    fn snapshot(&self) -> (BTreeMap<String, DocItem>, BTreeMap<String, Vec<String>>) {
        (
            self.symbols
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            self.renamed
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rules() -> NamingRules {
        NamingRules::new(
            vec!["python".to_string()],
            ["term", "label", "token", "doc", "pdbcommand", "2to3fixer"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    fn table() -> SymbolTable {
        SymbolTable::new(rules())
    }

    fn ingest(table: &mut SymbolTable, package: &str, rows: &[(&str, &str, &str)]) {
        let inventory = Inventory::from_rows(rows.iter().copied());
        table.ingest(package, &format!("https://{package}.example/"), &inventory);
    }

    #[test]
    fn test_ingest_splits_group_and_fragment() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[("py:method", "list.append", "library/stdtypes.html#list.append")],
        );
        let item = table.get_exact("list.append").unwrap();
        assert_eq!(item.group(), "method");
        assert_eq!(item.relative_path(), "library/stdtypes.html");
        assert_eq!(item.fragment_id(), "list.append");
        assert_eq!(item.base_url(), "https://python.example/");
        assert_eq!(table.base_url("python"), Some("https://python.example/"));
    }

    #[test]
    fn test_location_without_fragment() {
        let mut table = table();
        ingest(&mut table, "attrs", &[("std:doc", "overview", "overview.html")]);
        let item = table.get_exact("overview").unwrap();
        assert_eq!(item.relative_path(), "overview.html");
        assert_eq!(item.fragment_id(), "");
    }

    #[test]
    fn test_priority_package_displaces_incumbent() {
        let mut table = SymbolTable::new(NamingRules::new(vec!["A".to_string()], vec![]));
        ingest(&mut table, "B", &[("py:class", "Foo", "b.html#Foo")]);
        ingest(&mut table, "A", &[("py:class", "Foo", "a.html#Foo")]);

        assert_eq!(table.get_exact("Foo").unwrap().package(), "A");
        assert_eq!(table.get_exact("B.Foo").unwrap().package(), "B");
        assert_eq!(table.similar_names("Foo"), &["B.Foo".to_string()]);
    }

    #[test]
    fn test_non_priority_package_is_qualified() {
        let mut table = table();
        ingest(&mut table, "python", &[("py:class", "Foo", "p.html#Foo")]);
        ingest(&mut table, "other", &[("py:class", "Foo", "o.html#Foo")]);

        assert_eq!(table.get_exact("Foo").unwrap().package(), "python");
        assert_eq!(table.get_exact("other.Foo").unwrap().package(), "other");
        assert_eq!(table.similar_names("Foo"), &["other.Foo".to_string()]);
    }

    #[test]
    fn test_no_silent_overwrite_between_packages() {
        let mut table = table();
        ingest(&mut table, "alpha", &[("py:function", "foo", "a.html#foo")]);
        ingest(&mut table, "beta", &[("py:function", "foo", "b.html#foo")]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get_exact("foo").unwrap().package(), "alpha");
        assert_eq!(table.get_exact("beta.foo").unwrap().package(), "beta");
        assert_eq!(table.similar_names("foo"), &["beta.foo".to_string()]);
    }

    #[test]
    fn test_same_package_tie_break_renames_incumbent() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:function", "open", "functions.html#open"),
                ("py:method", "open", "io.html#open"),
            ],
        );
        assert_eq!(table.get_exact("open").unwrap().group(), "method");
        assert_eq!(table.get_exact("function.open").unwrap().group(), "function");
        assert_eq!(table.similar_names("open"), &["function.open".to_string()]);
    }

    #[test]
    fn test_force_prefix_group_is_qualified() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:function", "print", "functions.html#print"),
                ("std:term", "print", "glossary.html#term-print"),
            ],
        );
        assert_eq!(table.get_exact("print").unwrap().group(), "function");
        assert_eq!(table.get_exact("term.print").unwrap().group(), "term");
    }

    #[test]
    fn test_higher_ranked_force_prefix_group_displaces_lower() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("std:doc", "tutorial", "tutorial/index.html"),
                ("std:label", "tutorial", "tutorial/index.html#tutorial"),
            ],
        );
        // `label` ranks above `doc`, so the doc entry moves
        assert_eq!(table.get_exact("tutorial").unwrap().group(), "label");
        assert_eq!(table.get_exact("doc.tutorial").unwrap().group(), "doc");
    }

    #[test]
    fn test_lower_ranked_force_prefix_group_is_qualified() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("std:label", "tutorial", "tutorial/index.html#tutorial"),
                ("std:doc", "tutorial", "tutorial/index.html"),
            ],
        );
        assert_eq!(table.get_exact("tutorial").unwrap().group(), "label");
        assert_eq!(table.get_exact("doc.tutorial").unwrap().group(), "doc");
    }

    #[test]
    fn test_qualified_name_falls_back_to_package_and_group() {
        let mut table = table();
        ingest(&mut table, "python", &[("py:class", "Foo", "p.html#Foo")]);
        ingest(
            &mut table,
            "other",
            &[
                ("py:class", "other.Foo", "o.html#other.Foo"),
                ("py:function", "Foo", "o.html#Foo"),
            ],
        );
        assert_eq!(table.get_exact("other.Foo").unwrap().group(), "class");
        assert_eq!(
            table.get_exact("other.function.Foo").unwrap().group(),
            "function"
        );
        assert_eq!(
            table.similar_names("Foo"),
            &["other.function.Foo".to_string()]
        );
    }

    #[test]
    fn test_exhausted_qualifiers_get_numeric_suffix() {
        let mut table = table();
        ingest(&mut table, "python", &[("py:class", "Foo", "p.html#Foo")]);
        ingest(
            &mut table,
            "other",
            &[
                ("py:class", "other.Foo", "o.html#a"),
                ("py:class", "other.class.Foo", "o.html#b"),
                ("py:class", "Foo", "o.html#c"),
            ],
        );
        assert_eq!(table.get_exact("other.class.Foo_2").unwrap().fragment_id(), "c");
        assert_eq!(table.get_exact("other.class.Foo").unwrap().fragment_id(), "b");
    }

    #[test]
    fn test_renamed_names_are_always_keys() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:function", "x", "a.html#x"),
                ("py:method", "x", "b.html#x"),
                ("py:attribute", "x", "c.html#x"),
                ("std:term", "x", "d.html#x"),
            ],
        );
        ingest(&mut table, "other", &[("py:function", "x", "e.html#x")]);
        for alias in table.similar_names("x") {
            assert!(table.get_exact(alias).is_some(), "{alias} missing");
        }
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_ingestion_is_deterministic() {
        let rows_a = [
            ("py:class", "Foo", "a.html#Foo"),
            ("py:method", "Foo", "a.html#Foo.m"),
            ("std:label", "intro", "a.html#intro"),
        ];
        let rows_b = [
            ("py:class", "Foo", "b.html#Foo"),
            ("std:doc", "intro", "b.html"),
        ];

        let mut table = table();
        ingest(&mut table, "a", &rows_a);
        ingest(&mut table, "b", &rows_b);
        let first = table.snapshot();

        table.clear();
        assert!(table.is_empty());
        ingest(&mut table, "a", &rows_a);
        ingest(&mut table, "b", &rows_b);
        assert_eq!(table.snapshot(), first);
    }

    #[test]
    fn test_lookup_first_word_fallback() {
        let mut table = table();
        ingest(&mut table, "python", &[("py:class", "list", "stdtypes.html#list")]);

        let (name, item) = table.lookup("list append");
        assert_eq!(name, "list");
        assert_eq!(item, table.lookup("list").1);
        assert!(item.is_some());

        let (name, item) = table.lookup("dict");
        assert_eq!(name, "dict");
        assert!(item.is_none());
    }

    #[test]
    fn test_search_is_sorted_and_limited() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:method", "list.sort", "s.html#list.sort"),
                ("py:method", "list.append", "s.html#list.append"),
                ("py:class", "list", "s.html#list"),
                ("py:class", "dict", "s.html#dict"),
            ],
        );
        assert_eq!(table.search("list", 10), vec!["list", "list.append", "list.sort"]);
        assert_eq!(table.search("list", 2), vec!["list", "list.append"]);
        assert!(table.search("tuple", 10).is_empty());
    }

    #[test]
    fn test_complete_ranks_by_similarity_with_bonuses() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:method", "list.append", "s.html#list.append"),
                ("py:class", "dict", "s.html#dict"),
                ("py:function", "listen", "n.html#listen"),
                ("py:class", "list", "s.html#list"),
            ],
        );

        assert_eq!(
            table.complete("list", 24, 45),
            vec!["list", "listen", "list.append", "dict"]
        );
        assert_eq!(table.complete("list", 24, 55), vec!["list", "listen", "list.append"]);
        // the limit applies before the bonuses
        assert_eq!(table.complete("list", 2, 0), vec!["list", "listen"]);
        // case only matters for the similarity part
        assert_eq!(table.complete("LIST", 24, 45), vec!["list"]);
        assert!(table.complete("  ", 24, 0).is_empty());
    }

    #[test]
    fn test_attributes_are_direct_children_of_same_package() {
        let mut table = table();
        ingest(
            &mut table,
            "python",
            &[
                ("py:class", "list", "s.html#list"),
                ("py:method", "list.sort", "s.html#list.sort"),
                ("py:method", "list.append", "s.html#list.append"),
                ("py:attribute", "list.sort.key", "s.html#list.sort.key"),
            ],
        );
        ingest(&mut table, "other", &[("py:function", "list.extra", "o.html#x")]);

        let names: Vec<&str> = table.attributes("list").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["list.append", "list.sort"]);
        assert!(table.attributes("missing").is_empty());
    }

    #[test]
    fn test_clear_empties_everything() {
        let mut table = table();
        ingest(&mut table, "alpha", &[("py:function", "foo", "a.html#foo")]);
        ingest(&mut table, "beta", &[("py:function", "foo", "b.html#foo")]);
        table.clear();
        assert!(table.is_empty());
        assert!(table.packages().is_empty());
        assert!(table.similar_names("foo").is_empty());
    }
}
