#![deny(unsafe_code)]

//! Configuration loading and validation for docbot.
//!
//! Loads TOML configuration files and validates them before the engine is
//! built. [`AppConfig`] is the central configuration structure; the
//! `[docs]` section carries the package registry and the disambiguation
//! priorities consumed by the symbol table.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound HTTP settings shared by the inventory and page fetchers.
    #[serde(default)]
    pub http: HttpConfig,

    /// Rendered-symbol cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Documentation packages and disambiguation rules.
    #[serde(default)]
    pub docs: DocsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Outbound HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// How many times an inventory request is attempted before the package
    /// is reported unreachable.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            fetch_attempts: default_fetch_attempts(),
        }
    }
}

impl HttpConfig {
    /// The request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("docbot/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fetch_attempts() -> u32 {
    3
}

/// Rendered-symbol cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key namespace inside the (possibly shared) cache store.
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,

    /// Lifetime of a successfully rendered symbol, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Lifetime of a "nothing found at this fragment" tombstone, in seconds.
    #[serde(default = "default_cache_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// Lifetime of a downloaded inventory, in seconds. Zero disables
    /// inventory caching.
    #[serde(default = "default_inventory_ttl_secs")]
    pub inventory_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            ttl_secs: default_cache_ttl_secs(),
            negative_ttl_secs: default_cache_negative_ttl_secs(),
            inventory_ttl_secs: default_inventory_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn inventory_ttl(&self) -> Duration {
        Duration::from_secs(self.inventory_ttl_secs)
    }
}

fn default_cache_namespace() -> String {
    "docs".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60 // one week
}

fn default_cache_negative_ttl_secs() -> u64 {
    5 * 60
}

fn default_inventory_ttl_secs() -> u64 {
    12 * 60 * 60
}

/// Documentation packages and the rules used to disambiguate their symbols.
///
/// ## TOML Example
///
/// ```toml
/// [docs]
/// priority_packages = ["python"]
/// force_prefix_groups = ["term", "label", "token", "doc", "pdbcommand", "2to3fixer"]
/// retry_first_secs = 120
/// retry_repeated_secs = 300
/// completion_limit = 24
/// completion_threshold = 45
///
/// [[docs.packages]]
/// name = "python"
/// inventory_url = "https://docs.python.org/3/objects.inv"
///
/// [[docs.packages]]
/// name = "aiohttp"
/// inventory_url = "https://docs.aiohttp.org/en/stable/objects.inv"
/// base_url = "https://docs.aiohttp.org/en/stable/"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    /// Packages that win the bare symbol name when they collide with a
    /// symbol from another package.
    #[serde(default = "default_priority_packages")]
    pub priority_packages: Vec<String>,

    /// Groups that get their group name prefixed on duplicates. Order is
    /// significant: earlier groups outrank later ones.
    #[serde(default = "default_force_prefix_groups")]
    pub force_prefix_groups: Vec<String>,

    /// Delay before retrying an unreachable inventory for the first time.
    #[serde(default = "default_retry_first_secs")]
    pub retry_first_secs: u64,

    /// Delay before every subsequent consecutive retry of the same package.
    #[serde(default = "default_retry_repeated_secs")]
    pub retry_repeated_secs: u64,

    /// Candidates kept from the similarity ranking when completing a query.
    #[serde(default = "default_completion_limit")]
    pub completion_limit: usize,

    /// Minimum completion score (0-170) for a candidate to be offered.
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: u32,

    /// Registered packages, in ingestion order.
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            priority_packages: default_priority_packages(),
            force_prefix_groups: default_force_prefix_groups(),
            retry_first_secs: default_retry_first_secs(),
            retry_repeated_secs: default_retry_repeated_secs(),
            completion_limit: default_completion_limit(),
            completion_threshold: default_completion_threshold(),
            packages: Vec::new(),
        }
    }
}

impl DocsConfig {
    pub fn retry_first(&self) -> Duration {
        Duration::from_secs(self.retry_first_secs)
    }

    pub fn retry_repeated(&self) -> Duration {
        Duration::from_secs(self.retry_repeated_secs)
    }
}

fn default_priority_packages() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_force_prefix_groups() -> Vec<String> {
    ["term", "label", "token", "doc", "pdbcommand", "2to3fixer"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_retry_first_secs() -> u64 {
    2 * 60
}

fn default_retry_repeated_secs() -> u64 {
    5 * 60
}

fn default_completion_limit() -> usize {
    24
}

fn default_completion_threshold() -> u32 {
    45
}

/// A single documentation package registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// Canonical package name, used to qualify renamed symbols.
    pub name: String,

    /// URL of the package's `objects.inv` inventory.
    pub inventory_url: String,

    /// Root URL that relative symbol paths resolve against. Inferred from
    /// `inventory_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl PackageConfig {
    /// Create a registration whose base URL is inferred from the inventory.
    pub fn new(name: impl Into<String>, inventory_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inventory_url: inventory_url.into(),
            base_url: None,
        }
    }

    /// Builder: set an explicit base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// The configured base URL, or the inventory URL with its last path
    /// segment stripped.
    ///
    /// `https://docs.python.org/3/objects.inv` → `https://docs.python.org/3/`
    pub fn effective_base_url(&self) -> String {
        match self.base_url.as_deref() {
            Some(base) if !base.is_empty() => base.to_string(),
            _ => match self.inventory_url.rfind('/') {
                Some(idx) => self.inventory_url[..=idx].to_string(),
                None => String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.http.fetch_attempts == 0 {
            return Err(ConfigError::Validation(
                "http.fetch_attempts must be at least 1".to_string(),
            ));
        }

        if self.cache.namespace.is_empty() {
            return Err(ConfigError::Validation(
                "cache.namespace must not be empty".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.cache.negative_ttl_secs > self.cache.ttl_secs {
            return Err(ConfigError::Validation(format!(
                "cache.negative_ttl_secs ({}) must not exceed cache.ttl_secs ({})",
                self.cache.negative_ttl_secs, self.cache.ttl_secs
            )));
        }

        if self.docs.retry_first_secs == 0 {
            return Err(ConfigError::Validation(
                "docs.retry_first_secs must be non-zero".to_string(),
            ));
        }
        if self.docs.retry_repeated_secs <= self.docs.retry_first_secs {
            return Err(ConfigError::Validation(format!(
                "docs.retry_repeated_secs ({}) must be greater than docs.retry_first_secs ({})",
                self.docs.retry_repeated_secs, self.docs.retry_first_secs
            )));
        }

        if self.docs.completion_limit == 0 {
            return Err(ConfigError::Validation(
                "docs.completion_limit must be non-zero".to_string(),
            ));
        }

        let mut seen_groups = HashSet::new();
        for group in &self.docs.force_prefix_groups {
            if !seen_groups.insert(group.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "docs.force_prefix_groups lists {group:?} more than once"
                )));
            }
        }

        let mut seen_names = HashSet::new();
        for (i, package) in self.docs.packages.iter().enumerate() {
            if package.name.is_empty() || package.name.contains(char::is_whitespace) {
                return Err(ConfigError::Validation(format!(
                    "docs.packages[{i}].name must be non-empty and contain no whitespace, got {:?}",
                    package.name
                )));
            }
            // names are cache key segments; `*` addresses every package
            if package.name.contains(':') || package.name == "*" {
                return Err(ConfigError::Validation(format!(
                    "docs.packages[{i}].name must not contain ':' or be \"*\", got {:?}",
                    package.name
                )));
            }
            if !seen_names.insert(package.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "docs.packages[{i}].name {:?} is registered more than once",
                    package.name
                )));
            }
            validate_http_url(&format!("docs.packages[{i}].inventory_url"), &package.inventory_url)?;
            if let Some(base_url) = &package.base_url {
                validate_http_url(&format!("docs.packages[{i}].base_url"), base_url)?;
                if !base_url.ends_with('/') {
                    return Err(ConfigError::Validation(format!(
                        "docs.packages[{i}].base_url must end with a slash, got {base_url:?}"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Validation(format!("{field} is not a valid URL ({e}): {value:?}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "{field} must use http or https, got scheme {other:?}"
        ))),
    }
}
