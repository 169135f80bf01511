//! Configuration builders for tests.

use std::path::PathBuf;
use std::time::Duration;

use docbot_config::{AppConfig, PackageConfig};
use tempfile::TempDir;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .package("python", "https://docs.python.org/3/objects.inv")
///     .priority_packages(&["python"])
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Add a package whose base URL is inferred from `inventory_url`.
    pub fn package(mut self, name: &str, inventory_url: &str) -> Self {
        self.config
            .docs
            .packages
            .push(PackageConfig::new(name, inventory_url));
        self
    }

    /// Add a package served from `https://{name}.test/`.
    pub fn test_package(self, name: &str) -> Self {
        let url = format!("https://{name}.test/objects.inv");
        self.package(name, &url)
    }

    pub fn priority_packages(mut self, names: &[&str]) -> Self {
        self.config.docs.priority_packages = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn force_prefix_groups(mut self, groups: &[&str]) -> Self {
        self.config.docs.force_prefix_groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn retry_delays(mut self, first: Duration, repeated: Duration) -> Self {
        self.config.docs.retry_first_secs = first.as_secs();
        self.config.docs.retry_repeated_secs = repeated.as_secs();
        self
    }

    pub fn cache_namespace(mut self, namespace: &str) -> Self {
        self.config.cache.namespace = namespace.to_string();
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A config file in a temp directory, removed on drop.
pub struct TestConfigFile {
    pub config: AppConfig,
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TestConfigFile {
    /// Write `toml_content` to `docbot.toml` and load it back.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("docbot.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");
        let config = AppConfig::load(&path)
            .await
            .expect("failed to parse test config");

        Self {
            config,
            path,
            _temp_dir: temp_dir,
        }
    }
}
