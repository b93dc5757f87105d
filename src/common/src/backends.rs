use std::sync::Arc;

use anyhow::{Context, Result};
use object_store::ObjectStore;
use once_cell::sync::OnceCell;

use crate::config::Configuration;
use crate::docstore::{self, DocumentStore};
use crate::identity::{IdentityProvider, create_identity_provider};
use crate::storage::create_object_store;

static DEFAULT_BACKENDS: OnceCell<Backends> = OnceCell::new();

/// Handles to the external stores the engine talks to
#[derive(Clone)]
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("documents", &"DocumentStore")
            .field("blobs", &self.blobs.to_string())
            .field("identity", &"IdentityProvider")
            .finish()
    }
}

impl Backends {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            documents,
            blobs,
            identity,
        }
    }

    /// Connect every backend named by the configuration
    pub async fn from_config(config: &Configuration) -> Result<Self> {
        let documents = docstore::connect(&config.database.dsn, config.database.max_batch_size)
            .await
            .context("Failed to connect document store")?;
        let blobs =
            create_object_store(&config.storage).context("Failed to create blob store")?;
        let identity = create_identity_provider(&config.identity)
            .context("Failed to create identity provider")?;

        log::info!(
            "Backends ready: documents={}, blobs={}, identity={}",
            config.database.dsn,
            config.storage.dsn,
            config.identity.provider
        );

        Ok(Self::new(documents, blobs, identity))
    }

    /// Make these the process-wide default handles; the first call wins
    pub fn install_default(self) -> Result<&'static Backends> {
        DEFAULT_BACKENDS
            .set(self)
            .map_err(|_| anyhow::anyhow!("Default backends are already installed"))?;
        Self::global().context("Default backends missing after install")
    }

    /// Process-wide default handles, if installed
    pub fn global() -> Option<&'static Backends> {
        DEFAULT_BACKENDS.get()
    }

    /// The installed defaults, or connect them from configuration
    pub async fn global_or_connect(config: &Configuration) -> Result<&'static Backends> {
        if let Some(backends) = Self::global() {
            return Ok(backends);
        }
        let backends = Self::from_config(config).await?;
        // a concurrent installer may have won; either value is usable
        let _ = DEFAULT_BACKENDS.set(backends);
        Self::global().context("Default backends missing after install")
    }
}
