//! User identity reconciliation.
//!
//! Moves a user's data to a new identifier ([`MigrationOrchestrator`]) or
//! removes it entirely ([`DeletionOrchestrator`]) across the document store,
//! the blob store and the identity provider.

pub mod deletion;
pub mod error;
pub mod migration;
pub mod mirror;
pub mod resolver;
pub mod rewriter;
pub mod settings;

use common::Backends;
use common::config::Configuration;

pub use deletion::{AccountOutcome, DeletionOptions, DeletionOrchestrator, DeletionReport};
pub use error::ReconcileError;
pub use migration::{MigrationOrchestrator, MigrationOutcome, MigrationReport};
pub use mirror::{ObjectMirror, ReferenceMap};
pub use resolver::IdentityResolver;
pub use rewriter::ReferenceRewriter;
pub use settings::ReconcilerSettings;

/// Both orchestrators wired to one set of backends
pub struct Reconciler {
    pub migration: MigrationOrchestrator,
    pub deletion: DeletionOrchestrator,
}

impl Reconciler {
    pub fn new(backends: &Backends, settings: ReconcilerSettings) -> Self {
        Self {
            migration: MigrationOrchestrator::new(backends, settings.clone()),
            deletion: DeletionOrchestrator::new(backends, settings),
        }
    }

    pub fn from_config(
        backends: &Backends,
        config: &Configuration,
    ) -> Result<Self, ReconcileError> {
        Ok(Self::new(backends, ReconcilerSettings::from_config(config)?))
    }
}
