//! Test configuration builder for creating test setups quickly.

use crate::config::{Configuration, DatabaseConfig};

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_dependent_collections(&["tasks", "meals"])
///     .with_max_batch_size(2)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Defaults use in-memory document and blob stores and the memory identity provider
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.identity.provider = "memory".to_string();
        Self { config }
    }

    /// Use an in-memory SQLite document store instead of the map-based one
    pub fn with_sqlite(mut self) -> Self {
        self.config.database = DatabaseConfig {
            max_batch_size: self.config.database.max_batch_size,
            ..DatabaseConfig::sqlite_in_memory()
        };
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.config.database.max_batch_size = size;
        self
    }

    pub fn with_dependent_collections(mut self, collections: &[&str]) -> Self {
        self.config.schema.dependent_collections =
            collections.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_categories(mut self, categories: &[&str]) -> Self {
        self.config.storage.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_public_base_url(mut self, url: &str) -> Self {
        self.config.storage.public_base_url = url.to_string();
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
