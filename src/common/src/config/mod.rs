use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

/// Document store connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory://`, `sqlite::memory:` or `sqlite://path/to/file.db`
    pub dsn: String,
    /// Per-commit operation limit of the document store
    pub max_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            max_batch_size: 500,
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory SQLite configuration
    pub fn sqlite_in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            ..Self::default()
        }
    }
}

/// Blob storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `memory://`, `file:///path`, `s3://host/bucket` or `gs://bucket`
    pub dsn: String,
    /// Base of the URLs handed out to clients; the encoded object path is appended
    pub public_base_url: String,
    /// Metadata attribute that carries an object's access token
    pub token_metadata_key: String,
    /// Folders partitioned by user id, i.e. `<category>/<userId>/<filename>`
    pub categories: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
            public_base_url: String::from(
                "https://firebasestorage.googleapis.com/v0/b/habitsync.appspot.com/o",
            ),
            token_metadata_key: String::from("firebaseStorageDownloadTokens"),
            categories: vec!["meals".to_string(), "videos".to_string()],
        }
    }
}

/// Identity provider settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// `none`, `memory` or `http`
    pub provider: String,
    /// Base URL of the identity provider admin API (http provider only)
    pub endpoint: Option<String>,
    /// Bearer key sent with admin API requests
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider: String::from("none"),
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Layout of the persisted user data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Collection holding the primary user records, keyed by user id
    pub users_collection: String,
    /// Secondary identity field on the primary record
    pub identity_field: String,
    /// Ownership tag carried by every dependent record
    pub owner_field: String,
    /// Collections whose records are owned by a user via `owner_field`
    pub dependent_collections: Vec<String>,
    /// Reference fields on the primary record deleted one by one
    pub profile_reference_fields: Vec<String>,
    /// Field-name suffixes that mark a string field as a storage reference
    pub reference_field_suffixes: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            identity_field: "id".to_string(),
            owner_field: "userId".to_string(),
            dependent_collections: ["tasks", "analyses", "videos", "progress", "meals"]
                .into_iter()
                .map(String::from)
                .collect(),
            profile_reference_fields: vec!["profileImageUrl".to_string()],
            reference_field_suffixes: ["Url", "URL", "url", "Urls", "Path", "path", "Uri"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Document store configuration
    pub database: DatabaseConfig,
    /// Blob storage configuration
    pub storage: StorageConfig,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// Collection and field names
    pub schema: SchemaConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("habitsync.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path.as_ref()))
            .extract()
            .map_err(Box::new)
    }

    fn figment(toml: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(toml)
            .merge(Env::prefixed("HABITSYNC__").split("__"))
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }
        if self.database.max_batch_size == 0 {
            anyhow::bail!("Database max_batch_size must be greater than zero");
        }
        if self.storage.dsn.is_empty() {
            anyhow::bail!("Storage DSN cannot be empty");
        }
        if self.storage.categories.iter().any(|c| c.trim().is_empty()) {
            anyhow::bail!("Storage categories cannot contain empty names");
        }
        if self.schema.users_collection.is_empty() {
            anyhow::bail!("Users collection name cannot be empty");
        }
        if self.schema.dependent_collections.iter().any(|c| c.is_empty()) {
            anyhow::bail!("Dependent collection names cannot be empty");
        }
        if self.schema.owner_field.is_empty() || self.schema.identity_field.is_empty() {
            anyhow::bail!("Owner and identity field names cannot be empty");
        }
        match self.identity.provider.as_str() {
            "none" | "memory" => {}
            "http" => {
                if self.identity.endpoint.as_deref().unwrap_or("").is_empty() {
                    anyhow::bail!("Identity provider 'http' requires an endpoint");
                }
            }
            other => anyhow::bail!(
                "Unsupported identity provider: {other}. Supported: none, memory, http"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.database.dsn, "memory://");
        assert_eq!(config.database.max_batch_size, 500);
        assert_eq!(config.storage.categories, vec!["meals", "videos"]);
        assert_eq!(config.schema.users_collection, "users");
        assert_eq!(config.schema.owner_field, "userId");
        assert_eq!(config.identity.provider, "none");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.schema.dependent_collections.len(), 5);
        assert_eq!(config.identity.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("HABITSYNC__DATABASE__DSN", "sqlite::memory:");
            jail.set_env("HABITSYNC__IDENTITY__PROVIDER", "memory");
            jail.set_env("HABITSYNC__IDENTITY__TIMEOUT", "2s");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.database.dsn, "sqlite::memory:");
            assert_eq!(config.identity.provider, "memory");
            assert_eq!(config.identity.timeout, Duration::from_secs(2));
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "habitsync.toml",
                r#"
                [storage]
                dsn = "file:///tmp/blobs"
                categories = ["photos"]

                [schema]
                dependent_collections = ["tasks"]
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.storage.dsn, "file:///tmp/blobs");
            assert_eq!(config.storage.categories, vec!["photos"]);
            assert_eq!(config.schema.dependent_collections, vec!["tasks"]);
            // untouched sections keep their defaults
            assert_eq!(config.schema.owner_field, "userId");
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[database]\nmax_batch_size = 25\n")?;

            let config = Configuration::load_from_path("custom.toml").map_err(|e| *e)?;
            assert_eq!(config.database.max_batch_size, 25);
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_http_provider_without_endpoint() {
        let mut config = Configuration::default();
        config.identity.provider = "http".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requires an endpoint"));

        config.identity.endpoint = Some("https://idp.local".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Configuration::default();
        config.database.max_batch_size = 0;
        assert!(config.validate().is_err());
    }
}
