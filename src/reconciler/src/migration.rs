//! Identity migration: moves a user's primary record, blobs and dependent
//! records from an old identifier to a new one.
//!
//! Steps run in order: resolve the source record, mirror blobs, swap the
//! primary record inside one transaction, then patch every dependent record
//! in bounded batches. The fan-out is not transactional with the swap but
//! every step is idempotent, so re-running a failed migration converges.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::Backends;
use common::docstore::{DocumentSnapshot, DocumentStore, WriteBatch};
use serde_json::Value;

use crate::error::ReconcileError;
use crate::mirror::{ObjectMirror, ReferenceMap};
use crate::resolver::IdentityResolver;
use crate::rewriter::{ReferenceRewriter, RewriteContext};
use crate::settings::ReconcilerSettings;

/// What a migration run did
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// No primary record matched; nothing was touched
    NotFound,
    /// The primary record already lives at the new identifier
    AlreadyMigrated { user_id: String },
    Migrated(MigrationReport),
}

impl MigrationOutcome {
    pub fn message(&self) -> String {
        match self {
            MigrationOutcome::NotFound => "No user record found to migrate".to_string(),
            MigrationOutcome::AlreadyMigrated { user_id } => {
                format!("User {user_id} is already migrated")
            }
            MigrationOutcome::Migrated(report) => format!(
                "Migrated {} to {}: {} dependent records updated, {} blobs copied",
                report.from.join(", "),
                report.to,
                report.dependents_updated(),
                report.blobs_copied
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Identifiers whose data was moved
    pub from: Vec<String>,
    pub to: String,
    /// Whether this run replaced the primary record
    pub swapped: bool,
    /// Number of old locators mapped to new URLs
    pub references: usize,
    pub blobs_copied: usize,
    pub mirror_failures: Vec<String>,
    /// Dependent records patched per collection
    pub collections: BTreeMap<String, usize>,
}

impl MigrationReport {
    pub fn dependents_updated(&self) -> usize {
        self.collections.values().sum()
    }
}

/// Result of the transactional primary record replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// The record at the new key already carries the new identity
    AlreadyMigrated,
    /// The old record vanished between resolution and the swap
    SourceMissing,
}

pub struct MigrationOrchestrator {
    documents: Arc<dyn DocumentStore>,
    resolver: IdentityResolver,
    mirror: ObjectMirror,
    primary_rewriter: ReferenceRewriter,
    dependent_rewriter: ReferenceRewriter,
    settings: ReconcilerSettings,
}

impl MigrationOrchestrator {
    pub fn new(backends: &Backends, settings: ReconcilerSettings) -> Self {
        Self {
            documents: backends.documents.clone(),
            resolver: IdentityResolver::new(backends.documents.clone(), &settings),
            mirror: ObjectMirror::new(backends.blobs.clone(), &settings),
            primary_rewriter: ReferenceRewriter::new(settings.identity_field.clone(), &settings),
            dependent_rewriter: ReferenceRewriter::new(settings.owner_field.clone(), &settings),
            settings,
        }
    }

    /// Move `old_user_id` (or the record already naming `new_user_id` in its
    /// identity field when no old id is given) to `new_user_id`.
    pub async fn migrate(
        &self,
        old_user_id: Option<&str>,
        new_user_id: &str,
    ) -> Result<MigrationOutcome, ReconcileError> {
        if new_user_id.is_empty() {
            return Err(ReconcileError::MissingNewUserId);
        }
        let old_user_id = old_user_id.filter(|id| !id.is_empty());
        if old_user_id == Some(new_user_id) {
            return Err(ReconcileError::SameIdentity);
        }

        let Some(source) = self.resolver.resolve(old_user_id, new_user_id).await? else {
            tracing::info!(
                old_user_id = ?old_user_id,
                new_user_id = %new_user_id,
                "No primary record to migrate"
            );
            return Ok(MigrationOutcome::NotFound);
        };

        if source.id == new_user_id {
            tracing::info!(new_user_id = %new_user_id, "User already migrated");
            return Ok(MigrationOutcome::AlreadyMigrated {
                user_id: source.id,
            });
        }

        let mut from = vec![source.id.clone()];
        if let Some(requested) = old_user_id {
            if requested != source.id {
                from.push(requested.to_string());
            }
        }

        tracing::info!(
            old_user_id = %source.id,
            new_user_id = %new_user_id,
            matched_by = ?source.matched_by,
            "Starting migration"
        );

        let (mut report, references) = self.mirror_all(&from, new_user_id).await;

        let swap = self
            .swap_identity(&source.id, new_user_id, &from, &references)
            .await?;
        report.swapped = swap == SwapOutcome::Swapped;
        if swap != SwapOutcome::Swapped {
            tracing::warn!(
                old_user_id = %source.id,
                new_user_id = %new_user_id,
                outcome = ?swap,
                "Primary record swap skipped"
            );
        }

        report.collections = self
            .rewrite_dependents(&from, new_user_id, &references)
            .await?;

        tracing::info!(
            old_user_id = %source.id,
            new_user_id = %new_user_id,
            swapped = report.swapped,
            dependents = report.dependents_updated(),
            blobs = report.blobs_copied,
            "Migration complete"
        );
        Ok(MigrationOutcome::Migrated(report))
    }

    /// Re-run blob mirroring and the dependent fan-out for a migration whose
    /// primary record already moved.
    pub async fn resume(
        &self,
        old_user_id: &str,
        new_user_id: &str,
    ) -> Result<MigrationOutcome, ReconcileError> {
        if new_user_id.is_empty() {
            return Err(ReconcileError::MissingNewUserId);
        }
        if old_user_id.is_empty() {
            return Err(ReconcileError::MissingOldUserId);
        }
        if old_user_id == new_user_id {
            return Err(ReconcileError::SameIdentity);
        }

        let from = vec![old_user_id.to_string()];
        let (mut report, references) = self.mirror_all(&from, new_user_id).await;
        report.collections = self
            .rewrite_dependents(&from, new_user_id, &references)
            .await?;

        tracing::info!(
            old_user_id = %old_user_id,
            new_user_id = %new_user_id,
            dependents = report.dependents_updated(),
            "Migration resumed"
        );
        Ok(MigrationOutcome::Migrated(report))
    }

    async fn mirror_all(
        &self,
        from: &[String],
        new_user_id: &str,
    ) -> (MigrationReport, ReferenceMap) {
        let mut report = MigrationReport {
            from: from.to_vec(),
            to: new_user_id.to_string(),
            ..Default::default()
        };
        let mut references = ReferenceMap::new();
        for old in from {
            let mirrored = self.mirror.mirror(old, new_user_id).await;
            report.blobs_copied += mirrored.copied;
            report.mirror_failures.extend(mirrored.failures);
            references.extend(mirrored.references);
        }
        report.references = references.len();
        (report, references)
    }

    /// Replace the primary record at `old_key` with one at `new_user_id`.
    ///
    /// Both records are re-read inside the transaction. The new record is
    /// merged rather than overwritten so fields it already has survive.
    pub async fn swap_identity(
        &self,
        old_key: &str,
        new_user_id: &str,
        from: &[String],
        references: &ReferenceMap,
    ) -> Result<SwapOutcome, ReconcileError> {
        let users = self.settings.users_collection.as_str();
        let new_identity = Value::String(new_user_id.to_string());

        let mut tx = self.documents.begin().await?;
        let existing = tx.get(users, new_user_id).await?;
        if let Some(existing) = &existing {
            if self.settings.identity_field.lookup(existing) == Some(&new_identity) {
                return Ok(SwapOutcome::AlreadyMigrated);
            }
        }
        let Some(mut data) = tx.get(users, old_key).await? else {
            return Ok(SwapOutcome::SourceMissing);
        };

        for old in from {
            let ctx = RewriteContext {
                old_id: old,
                new_id: new_user_id,
                references,
            };
            self.primary_rewriter.patch(&data, &ctx).apply_to(&mut data);
        }

        tx.merge(users, new_user_id, data);
        tx.delete(users, old_key);
        tx.commit().await?;

        tracing::debug!(
            old_key = %old_key,
            new_user_id = %new_user_id,
            merged_into_existing = existing.is_some(),
            "Swapped primary record"
        );
        Ok(SwapOutcome::Swapped)
    }

    /// Patch every dependent record tagged with one of `from`.
    ///
    /// Returns the number of records patched per collection.
    pub async fn rewrite_dependents(
        &self,
        from: &[String],
        new_user_id: &str,
        references: &ReferenceMap,
    ) -> Result<BTreeMap<String, usize>, ReconcileError> {
        let mut counts = BTreeMap::new();
        for collection in &self.settings.dependent_collections {
            let mut updated = 0;
            for old in from {
                let records = self
                    .documents
                    .query(
                        collection,
                        &self.settings.owner_field,
                        &Value::String(old.clone()),
                        None,
                    )
                    .await?;
                let ctx = RewriteContext {
                    old_id: old,
                    new_id: new_user_id,
                    references,
                };
                updated += self.patch_records(collection, &records, &ctx).await?;
            }
            tracing::debug!(
                collection = %collection,
                new_user_id = %new_user_id,
                updated,
                "Rewrote dependent records"
            );
            counts.insert(collection.clone(), updated);
        }
        Ok(counts)
    }

    async fn patch_records(
        &self,
        collection: &str,
        records: &[DocumentSnapshot],
        ctx: &RewriteContext<'_>,
    ) -> Result<usize, ReconcileError> {
        let batch_size = self.documents.max_batch_size().max(1);
        for chunk in records.chunks(batch_size) {
            let mut batch = WriteBatch::new();
            for record in chunk {
                batch.update(
                    collection,
                    &record.id,
                    self.dependent_rewriter.patch(&record.data, ctx),
                );
            }
            self.documents.commit(batch).await?;
        }
        Ok(records.len())
    }
}
