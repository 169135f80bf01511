//! Sphinx `objects.inv` inventories: the parsed representation, the decoder,
//! and the sources that fetch them.
//!
//! An inventory maps every documented symbol of a package to the page (and
//! anchor) documenting it. Two on-disk formats exist:
//!
//! - **v1**: plain text, one `name type location` triple per line.
//! - **v2**: a four-line plain header followed by a zlib stream of
//!   `name domain:role priority location display_name` lines.
//!
//! Both are normalised to [`Inventory`], which keeps groups in the order they
//! first appear so ingestion order (and therefore disambiguation) is stable.

use std::collections::HashMap;
use std::io::Read;
use std::sync::LazyLock;
use std::time::Duration;

use flate2::read::ZlibDecoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use docbot_config::HttpConfig;

use crate::BoxFuture;

/// A single inventory line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Symbol name as written in the inventory, e.g. `list.append`.
    pub name: String,
    /// Location relative to the package's base URL, including any `#anchor`.
    pub location: String,
    /// Display name, when the inventory provides one distinct from `name`.
    pub display_name: Option<String>,
}

/// Parsed inventory, grouped by `domain:role` (e.g. `py:class`).
///
/// Serializes as an ordered list of `(group, entries)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, Vec<InventoryEntry>)>", into = "Vec<(String, Vec<InventoryEntry>)>")]
pub struct Inventory {
    groups: Vec<(String, Vec<InventoryEntry>)>,
    index: HashMap<String, usize>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from `(group_path, name, location)` triples.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        let mut inventory = Self::new();
        for (group, name, location) in rows {
            inventory.push(group, name, location);
        }
        inventory
    }

    /// Append an entry to `group`, creating the group if this is its first entry.
    pub fn push(&mut self, group: &str, name: &str, location: &str) {
        self.push_entry(
            group,
            InventoryEntry {
                name: name.to_string(),
                location: location.to_string(),
                display_name: None,
            },
        );
    }

    fn push_entry(&mut self, group: &str, entry: InventoryEntry) {
        let idx = match self.index.get(group) {
            Some(&idx) => idx,
            None => {
                self.groups.push((group.to_string(), Vec::new()));
                self.index.insert(group.to_string(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[idx].1.push(entry);
    }

    /// Groups in first-seen order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[InventoryEntry])> {
        self.groups
            .iter()
            .map(|(group, entries)| (group.as_str(), entries.as_slice()))
    }

    /// Every entry, group by group.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &InventoryEntry)> {
        self.groups
            .iter()
            .flat_map(|(group, entries)| entries.iter().map(move |e| (group.as_str(), e)))
    }

    /// Total number of entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<(String, Vec<InventoryEntry>)>> for Inventory {
    fn from(groups: Vec<(String, Vec<InventoryEntry>)>) -> Self {
        let mut inventory = Self::new();
        for (group, entries) in groups {
            for entry in entries {
                inventory.push_entry(&group, entry);
            }
        }
        inventory
    }
}

impl From<Inventory> for Vec<(String, Vec<InventoryEntry>)> {
    fn from(inventory: Inventory) -> Self {
        inventory.groups
    }
}

/// Errors from fetching an inventory.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The request went through but the body is not a usable inventory.
    /// Retrying would reproduce the same error.
    #[error("malformed inventory at {url}: {reason}")]
    Malformed { url: String, reason: String },

    /// The inventory could not be downloaded. Worth retrying later.
    #[error("inventory at {url} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        url: String,
        attempts: u32,
        reason: String,
    },
}

impl InventoryError {
    /// Whether a later retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Unreachable { .. })
    }
}

/// The inventory body failed header or format validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidHeaderError(pub String);

static V2_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s+(\S*:\S*)\s+(-?\d+)\s+?(\S*)\s+(.*)$").expect("static regex is valid")
});

/// Decode a complete inventory body (either format).
pub fn decode_inventory(body: &[u8]) -> Result<Inventory, InvalidHeaderError> {
    let mut lines = HeaderLines::new(body);

    let version_header = lines.next_line();
    let version = version_header
        .trim_end()
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(|| {
            InvalidHeaderError("Unable to convert inventory version header.".to_string())
        })?;

    let has_project = lines.next_line().starts_with("# Project");
    let has_version = lines.next_line().starts_with("# Version");
    if !(has_project && has_version) {
        return Err(InvalidHeaderError(
            "Inventory missing project or version header.".to_string(),
        ));
    }

    match version {
        1 => {
            let text = std::str::from_utf8(lines.rest())
                .map_err(|e| InvalidHeaderError(format!("inventory is not UTF-8: {e}")))?;
            Ok(load_v1(text))
        }
        2 => {
            if !lines.next_line().contains("zlib") {
                return Err(InvalidHeaderError(
                    "'zlib' not found in header of compressed inventory.".to_string(),
                ));
            }
            let mut text = String::new();
            ZlibDecoder::new(lines.rest())
                .read_to_string(&mut text)
                .map_err(|e| InvalidHeaderError(format!("failed to decompress inventory: {e}")))?;
            Ok(load_v2(&text))
        }
        _ => Err(InvalidHeaderError(
            "Incompatible inventory version.".to_string(),
        )),
    }
}

/// Split off the first whitespace-delimited field, skipping any run of
/// whitespace after it.
fn split_field(text: &str) -> Option<(&str, &str)> {
    let (field, rest) = text.trim_start().split_once(char::is_whitespace)?;
    Some((field, rest.trim_start()))
}

fn load_v1(text: &str) -> Inventory {
    let mut inventory = Inventory::new();
    for line in text.lines() {
        let fields = split_field(line.trim_end())
            .and_then(|(name, rest)| split_field(rest).map(|(kind, location)| (name, kind, location)));
        let Some((name, kind, location)) = fields.filter(|(_, _, location)| !location.is_empty())
        else {
            trace!(line, "Skipping short v1 inventory line");
            continue;
        };
        // v1 locations carry no anchors
        let (group, location) = if kind == "mod" {
            ("py:module".to_string(), format!("{location}#module-{name}"))
        } else {
            (format!("py:{kind}"), format!("{location}#{name}"))
        };
        inventory.push_entry(
            &group,
            InventoryEntry {
                name: name.to_string(),
                location,
                display_name: None,
            },
        );
    }
    inventory
}

fn load_v2(text: &str) -> Inventory {
    let mut inventory = Inventory::new();
    for line in text.lines() {
        let Some(caps) = V2_LINE.captures(line.trim_end()) else {
            trace!(line, "Skipping unparseable v2 inventory line");
            continue;
        };
        let name = &caps[1];
        let group = &caps[2];
        let mut location = caps[4].to_string();
        if location.ends_with('$') {
            location.pop();
            location.push_str(name);
        }
        let display_name = match &caps[5] {
            "-" => None,
            display if display == name => None,
            display => Some(display.to_string()),
        };
        inventory.push_entry(
            group,
            InventoryEntry {
                name: name.to_string(),
                location,
                display_name,
            },
        );
    }
    inventory
}

/// Splits the plain-text header off the front of an inventory body.
struct HeaderLines<'a> {
    remaining: &'a [u8],
}

impl<'a> HeaderLines<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { remaining: body }
    }

    /// The next `\n`-terminated line, lossily decoded. Empty at end of input.
    fn next_line(&mut self) -> String {
        let end = self
            .remaining
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.remaining.len(), |pos| pos + 1);
        let (line, rest) = self.remaining.split_at(end);
        self.remaining = rest;
        String::from_utf8_lossy(line).trim_end().to_string()
    }

    fn rest(&self) -> &'a [u8] {
        self.remaining
    }
}

/// Anything that can produce a package's inventory from its URL.
pub trait InventorySource: Send + Sync {
    /// Fetch and decode the inventory at `url`.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Inventory, InventoryError>>;
}

/// Downloads inventories over HTTP, retrying failed requests a few times
/// before reporting the inventory unreachable.
pub struct HttpInventorySource {
    client: reqwest::Client,
    attempts: u32,
}

impl HttpInventorySource {
    /// Create a source with its own client configured from `[http]`.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;
        Ok(Self::with_client(client, config.fetch_attempts))
    }

    /// Create a source around an existing client.
    pub fn with_client(client: reqwest::Client, attempts: u32) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

impl InventorySource for HttpInventorySource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Inventory, InventoryError>> {
        Box::pin(async move {
            let mut last_error = String::new();
            for attempt in 1..=self.attempts {
                match self.fetch_once(url).await {
                    Ok(body) => {
                        let inventory = decode_inventory(&body).map_err(|e| {
                            InventoryError::Malformed {
                                url: url.to_string(),
                                reason: e.0,
                            }
                        })?;
                        debug!(url, symbols = inventory.len(), "Fetched inventory");
                        return Ok(inventory);
                    }
                    Err(e) if e.is_connect() || e.is_timeout() => {
                        warn!(
                            url,
                            attempt,
                            attempts = self.attempts,
                            error = %e,
                            "Failed to connect to inventory url; trying again"
                        );
                        last_error = e.to_string();
                    }
                    Err(e) => {
                        error!(
                            url,
                            attempt,
                            attempts = self.attempts,
                            error = %e,
                            "Failed to get inventory; trying again"
                        );
                        last_error = e.to_string();
                    }
                }
                if attempt < self.attempts {
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
            }
            Err(InventoryError::Unreachable {
                url: url.to_string(),
                attempts: self.attempts,
                reason: last_error,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use pretty_assertions::assert_eq;

    use super::*;

    const V2_HEADER: &str = "# Sphinx inventory version 2\n\
                             # Project: Python\n\
                             # Version: 3.12\n\
                             # The remainder of this file is compressed using zlib.\n";

    fn v2_body(lines: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(lines.as_bytes()).unwrap();
        let mut body = V2_HEADER.as_bytes().to_vec();
        body.extend(encoder.finish().unwrap());
        body
    }

    #[test]
    fn test_decode_v2() {
        let body = v2_body(
            "list.append py:method 1 library/stdtypes.html#$ -\n\
             glossary term std:term -1 glossary.html#term-glossary-term Glossary term\n\
             asyncio py:module 0 library/asyncio.html#module-$ -\n",
        );
        let inventory = decode_inventory(&body).unwrap();
        assert_eq!(inventory.len(), 3);

        let groups: Vec<&str> = inventory.groups().map(|(g, _)| g).collect();
        assert_eq!(groups, vec!["py:method", "std:term", "py:module"]);

        let rows: Vec<(&str, &InventoryEntry)> = inventory.rows().collect();
        assert_eq!(rows[0].1.name, "list.append");
        assert_eq!(rows[0].1.location, "library/stdtypes.html#list.append");
        assert_eq!(rows[1].1.name, "glossary term");
        assert_eq!(rows[1].1.display_name.as_deref(), Some("Glossary term"));
        assert_eq!(rows[2].1.location, "library/asyncio.html#module-asyncio");
    }

    #[test]
    fn test_decode_v2_skips_garbage_lines() {
        let body = v2_body("not an inventory line\nfoo py:function 1 api.html#$ -\n");
        let inventory = decode_inventory(&body).unwrap();
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn test_decode_v1() {
        let body = b"# Sphinx inventory version 1\n\
                     # Project: Old\n\
                     # Version: 0.1\n\
                     oldmod mod oldmod.html\n\
                     oldmod.func function oldmod.html\n";
        let inventory = decode_inventory(body).unwrap();
        let rows: Vec<(&str, &InventoryEntry)> = inventory.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "py:module");
        assert_eq!(rows[0].1.location, "oldmod.html#module-oldmod");
        assert_eq!(rows[1].0, "py:function");
        assert_eq!(rows[1].1.location, "oldmod.html#oldmod.func");
    }

    #[test]
    fn test_decode_v1_collapses_whitespace_runs() {
        let body = b"# Sphinx inventory version 1\n\
                     # Project: Old\n\
                     # Version: 0.1\n\
                     oldmod.func  function\t  oldmod.html\n\
                     lonely   mod\n";
        let inventory = decode_inventory(body).unwrap();
        let rows: Vec<(&str, &InventoryEntry)> = inventory.rows().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "py:function");
        assert_eq!(rows[0].1.name, "oldmod.func");
        assert_eq!(rows[0].1.location, "oldmod.html#oldmod.func");
    }

    #[test]
    fn test_decode_rejects_bad_version_header() {
        let err = decode_inventory(b"# Sphinx inventory version x\n").unwrap_err();
        assert_eq!(err.0, "Unable to convert inventory version header.");
    }

    #[test]
    fn test_decode_rejects_missing_project_header() {
        let err = decode_inventory(b"# Sphinx inventory version 2\n# Version: 1\n").unwrap_err();
        assert_eq!(err.0, "Inventory missing project or version header.");
    }

    #[test]
    fn test_decode_rejects_missing_zlib_marker() {
        let body = b"# Sphinx inventory version 2\n# Project: X\n# Version: 1\n# plain\n";
        let err = decode_inventory(body).unwrap_err();
        assert!(err.0.contains("zlib"));
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let body = b"# Sphinx inventory version 3\n# Project: X\n# Version: 1\n";
        let err = decode_inventory(body).unwrap_err();
        assert_eq!(err.0, "Incompatible inventory version.");
    }

    #[test]
    fn test_decode_rejects_html() {
        assert!(decode_inventory(b"<!DOCTYPE html><html></html>").is_err());
        assert!(decode_inventory(b"").is_err());
    }

    #[test]
    fn test_from_rows_preserves_first_seen_group_order() {
        let inventory = Inventory::from_rows([
            ("py:class", "A", "a.html#A"),
            ("std:label", "intro", "intro.html#intro"),
            ("py:class", "B", "b.html#B"),
        ]);
        let groups: Vec<(&str, usize)> = inventory.groups().map(|(g, e)| (g, e.len())).collect();
        assert_eq!(groups, vec![("py:class", 2), ("std:label", 1)]);
        let names: Vec<&str> = inventory.rows().map(|(_, e)| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "intro"]);
    }

    #[test]
    fn test_json_form_keeps_group_order() {
        let inventory = Inventory::from_rows([
            ("std:label", "intro", "intro.html#intro"),
            ("py:class", "A", "a.html#A"),
            ("std:label", "usage", "usage.html#usage"),
        ]);
        let json = serde_json::to_string(&inventory).unwrap();
        assert!(json.starts_with(r#"[["std:label","#), "{json}");

        let decoded: Inventory = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, inventory);
        let groups: Vec<&str> = decoded.groups().map(|(g, _)| g).collect();
        assert_eq!(groups, vec!["std:label", "py:class"]);
    }

    #[test]
    fn test_error_transience() {
        let malformed = InventoryError::Malformed {
            url: "u".to_string(),
            reason: "r".to_string(),
        };
        let unreachable = InventoryError::Unreachable {
            url: "u".to_string(),
            attempts: 3,
            reason: "r".to_string(),
        };
        assert!(!malformed.is_transient());
        assert!(unreachable.is_transient());
    }
}
