//! Cascading deletion of everything a user owns.
//!
//! Dependent records go first, then the primary record, then blobs and
//! finally the identity-provider account. Every step treats "nothing there"
//! as success, so a run that crashed halfway can simply be repeated.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use common::Backends;
use common::docstore::{DocumentStore, WriteBatch};
use common::identity::{IdentityError, IdentityProvider};
use common::storage::locator_to_path;
use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};
use serde::Serialize;
use serde_json::Value;

use crate::error::ReconcileError;
use crate::resolver::IdentityResolver;
use crate::settings::ReconcilerSettings;

#[derive(Debug, Clone, Copy)]
pub struct DeletionOptions {
    /// Remove the identity-provider account as the last step
    pub delete_account: bool,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            delete_account: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOutcome {
    Deleted,
    NotFound,
    Skipped,
    Failed,
}

/// Counts of what one deletion run removed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionReport {
    pub users: usize,
    pub collections: BTreeMap<String, usize>,
    pub storage: usize,
    pub auth: AccountOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

pub struct DeletionOrchestrator {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn ObjectStore>,
    identity: Arc<dyn IdentityProvider>,
    resolver: IdentityResolver,
    settings: ReconcilerSettings,
}

impl DeletionOrchestrator {
    pub fn new(backends: &Backends, settings: ReconcilerSettings) -> Self {
        Self {
            documents: backends.documents.clone(),
            blobs: backends.blobs.clone(),
            identity: backends.identity.clone(),
            resolver: IdentityResolver::new(backends.documents.clone(), &settings),
            settings,
        }
    }

    pub async fn delete(
        &self,
        user_id: &str,
        options: DeletionOptions,
    ) -> Result<DeletionReport, ReconcileError> {
        if user_id.is_empty() {
            return Err(ReconcileError::MissingUserId);
        }

        let primaries = self.resolver.lookup_all(user_id).await?;
        let mut owners = vec![user_id.to_string()];
        let mut profile_paths = Vec::new();
        for primary in &primaries {
            if !owners.contains(&primary.id) {
                owners.push(primary.id.clone());
            }
            for field in &self.settings.profile_reference_fields {
                if let Some(Value::String(locator)) = field.lookup(&primary.data) {
                    profile_paths.extend(locator_to_path(&self.settings.public_base_url, locator));
                }
            }
        }

        let mut report = DeletionReport {
            users: 0,
            collections: BTreeMap::new(),
            storage: 0,
            auth: AccountOutcome::Skipped,
            errors: Vec::new(),
        };

        for collection in &self.settings.dependent_collections {
            let mut deleted = 0;
            for owner in &owners {
                match self.delete_owned(collection, owner).await {
                    Ok(count) => deleted += count,
                    Err(e) => {
                        tracing::warn!(
                            collection = %collection,
                            user_id = %owner,
                            error = %e,
                            "Failed to delete dependent records"
                        );
                        report
                            .errors
                            .push(format!("Failed to delete from {collection}: {e}"));
                    }
                }
            }
            report.collections.insert(collection.clone(), deleted);
        }

        for primary in &primaries {
            match self
                .documents
                .delete(&self.settings.users_collection, &primary.id)
                .await
            {
                Ok(()) => report.users += 1,
                Err(e) => {
                    tracing::warn!(
                        user_id = %primary.id,
                        error = %e,
                        "Failed to delete primary record"
                    );
                    report
                        .errors
                        .push(format!("Failed to delete user record {}: {e}", primary.id));
                }
            }
        }

        report.storage = self
            .delete_blobs(&owners, profile_paths, &mut report.errors)
            .await;

        report.auth = if options.delete_account {
            self.delete_account(user_id, &mut report.errors).await
        } else {
            AccountOutcome::Skipped
        };

        tracing::info!(
            user_id = %user_id,
            users = report.users,
            dependents = report.collections.values().sum::<usize>(),
            storage = report.storage,
            auth = ?report.auth,
            errors = report.errors.len(),
            "User deleted"
        );
        Ok(report)
    }

    async fn delete_owned(&self, collection: &str, owner: &str) -> Result<usize, ReconcileError> {
        let records = self
            .documents
            .query(
                collection,
                &self.settings.owner_field,
                &Value::String(owner.to_string()),
                None,
            )
            .await?;

        let batch_size = self.documents.max_batch_size().max(1);
        for chunk in records.chunks(batch_size) {
            let mut batch = WriteBatch::new();
            for record in chunk {
                batch.delete(collection, &record.id);
            }
            self.documents.commit(batch).await?;
        }
        Ok(records.len())
    }

    async fn delete_blobs(
        &self,
        owners: &[String],
        profile_paths: Vec<Path>,
        errors: &mut Vec<String>,
    ) -> usize {
        let mut targets = Vec::new();
        for category in &self.settings.categories {
            for owner in owners {
                let prefix = Path::from(format!("{category}/{owner}"));
                match self
                    .blobs
                    .list(Some(&prefix))
                    .map_ok(|meta| meta.location)
                    .try_collect::<Vec<_>>()
                    .await
                {
                    Ok(paths) => targets.extend(paths),
                    Err(e) => {
                        tracing::warn!(prefix = %prefix, error = %e, "Failed to list blobs");
                        errors.push(format!("Failed to list {prefix}: {e}"));
                    }
                }
            }
        }

        for path in profile_paths {
            match self.blobs.head(&path).await {
                Ok(_) => targets.push(path),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => errors.push(format!("Failed to inspect {path}: {e}")),
            }
        }

        let mut seen = HashSet::new();
        let mut deleted = 0;
        for path in targets {
            if !seen.insert(path.to_string()) {
                continue;
            }
            match self.blobs.delete(&path).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to delete blob");
                    errors.push(format!("Failed to delete {path}: {e}"));
                }
            }
        }
        deleted
    }

    async fn delete_account(&self, user_id: &str, errors: &mut Vec<String>) -> AccountOutcome {
        match self.identity.delete_account(user_id).await {
            Ok(()) => AccountOutcome::Deleted,
            Err(IdentityError::NotFound(_)) => AccountOutcome::NotFound,
            Err(IdentityError::Disabled) => AccountOutcome::Skipped,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to delete identity account");
                errors.push(format!("Failed to delete account {user_id}: {e}"));
                AccountOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::docstore::{
        Document, DocumentSnapshot, FieldPath, MemoryDocumentStore, StoreError, Transaction,
    };
    use common::storage::object_url;
    use common::testing::{FailingBlobs, TestBackends, TestConfigBuilder, doc};
    use mockall::mock;
    use serde_json::json;

    const BASE: &str = "https://store.test/o";
    const KEEP_ACCOUNT: DeletionOptions = DeletionOptions {
        delete_account: false,
    };

    mock! {
        pub Identity {}

        #[async_trait]
        impl IdentityProvider for Identity {
            async fn delete_account(&self, uid: &str) -> Result<(), IdentityError>;
        }
    }

    /// Delegates to a memory store but fails every query on one collection
    struct FailingCollection {
        inner: MemoryDocumentStore,
        failing: &'static str,
    }

    #[async_trait]
    impl DocumentStore for FailingCollection {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
            self.inner.get(collection, id).await
        }

        async fn query(
            &self,
            collection: &str,
            field: &FieldPath,
            value: &Value,
            limit: Option<usize>,
        ) -> Result<Vec<DocumentSnapshot>, StoreError> {
            if collection == self.failing {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.query(collection, field, value, limit).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
            self.inner.commit(batch).await
        }

        async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
            self.inner.begin().await
        }

        fn max_batch_size(&self) -> usize {
            self.inner.max_batch_size()
        }
    }

    fn settings() -> ReconcilerSettings {
        let config = TestConfigBuilder::new()
            .with_public_base_url(BASE)
            .with_dependent_collections(&["tasks", "meals"])
            .build();
        ReconcilerSettings::from_config(&config).unwrap()
    }

    fn orchestrator(backends: &Backends) -> DeletionOrchestrator {
        DeletionOrchestrator::new(backends, settings())
    }

    async fn seed_user(test: &TestBackends) {
        let profile = object_url(BASE, &Path::from("avatars/u1.png"), Some("tok"));
        test.documents
            .set("users", "u1", doc(json!({"id": "u1", "profileImageUrl": profile})))
            .await
            .unwrap();
        for i in 0..3 {
            test.documents
                .set("tasks", &format!("t{i}"), doc(json!({"userId": "u1"})))
                .await
                .unwrap();
        }
        test.documents
            .set("tasks", "keep", doc(json!({"userId": "u2"})))
            .await
            .unwrap();
        test.documents
            .set("meals", "m1", doc(json!({"userId": "u1"})))
            .await
            .unwrap();
        test.put_blob("meals/u1/a.jpg", b"a", &[]).await;
        test.put_blob("videos/u1/v.mp4", b"v", &[]).await;
        test.put_blob("avatars/u1.png", b"p", &[]).await;
        test.put_blob("meals/u2/b.jpg", b"b", &[]).await;
        test.identity.create_account("u1").await;
    }

    #[tokio::test]
    async fn test_delete_everything_owned() {
        let test = TestBackends::default();
        seed_user(&test).await;

        let report = orchestrator(&test.backends())
            .delete("u1", DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.users, 1);
        assert_eq!(report.collections.get("tasks"), Some(&3));
        assert_eq!(report.collections.get("meals"), Some(&1));
        assert_eq!(report.storage, 3);
        assert_eq!(report.auth, AccountOutcome::Deleted);
        assert!(report.errors.is_empty());

        assert_eq!(test.documents.get("users", "u1").await.unwrap(), None);
        assert_eq!(
            test.documents.documents("tasks").await,
            vec![DocumentSnapshot {
                id: "keep".to_string(),
                data: doc(json!({"userId": "u2"})),
            }]
        );
        assert!(test.blob_paths("meals/u1").await.is_empty());
        assert!(test.blob_paths("videos/u1").await.is_empty());
        assert!(test.blob_paths("avatars").await.is_empty());
        assert_eq!(test.blob_paths("meals/u2").await, vec!["meals/u2/b.jpg"]);
        assert!(!test.identity.has_account("u1").await);
    }

    #[tokio::test]
    async fn test_second_delete_reports_zero_counts() {
        let test = TestBackends::default();
        seed_user(&test).await;
        let deletion = orchestrator(&test.backends());

        deletion.delete("u1", DeletionOptions::default()).await.unwrap();
        let report = deletion.delete("u1", DeletionOptions::default()).await.unwrap();

        assert_eq!(report.users, 0);
        assert_eq!(report.storage, 0);
        assert!(report.collections.values().all(|count| *count == 0));
        assert_eq!(report.auth, AccountOutcome::NotFound);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_serializes_zero_counts() {
        let test = TestBackends::default();
        let report = orchestrator(&test.backends())
            .delete("u1", KEEP_ACCOUNT)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "users": 0,
                "collections": {"meals": 0, "tasks": 0},
                "storage": 0,
                "auth": "skipped"
            })
        );
    }

    #[tokio::test]
    async fn test_batched_deletes_respect_commit_limit() {
        let test = TestBackends::new(2);
        for i in 0..5 {
            test.documents
                .set("tasks", &format!("t{i}"), doc(json!({"userId": "u1"})))
                .await
                .unwrap();
        }

        let report = orchestrator(&test.backends())
            .delete("u1", DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.collections.get("tasks"), Some(&5));
        assert!(test.documents.documents("tasks").await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_collection_does_not_stop_the_rest() {
        let test = TestBackends::default();
        seed_user(&test).await;
        let backends = Backends::new(
            Arc::new(FailingCollection {
                inner: test.documents.clone(),
                failing: "tasks",
            }),
            test.blobs.clone(),
            Arc::new(test.identity.clone()),
        );

        let report = orchestrator(&backends)
            .delete("u1", DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.collections.get("tasks"), Some(&0));
        assert_eq!(report.collections.get("meals"), Some(&1));
        assert_eq!(report.users, 1);
        assert_eq!(report.storage, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("tasks"));
    }

    #[tokio::test]
    async fn test_failing_blob_delete_does_not_stop_the_rest() {
        let test = TestBackends::default();
        seed_user(&test).await;
        let backends = Backends::new(
            Arc::new(test.documents.clone()),
            Arc::new(FailingBlobs::writes_only(test.blobs.clone(), "videos/u1")),
            Arc::new(test.identity.clone()),
        );

        let report = orchestrator(&backends)
            .delete("u1", DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.users, 1);
        assert_eq!(report.storage, 2);
        assert_eq!(report.auth, AccountOutcome::Deleted);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to delete videos/u1/v.mp4"));
        assert!(test.blob_paths("meals/u1").await.is_empty());
        assert!(test.blob_paths("avatars").await.is_empty());
        assert_eq!(test.blob_paths("videos/u1").await, vec!["videos/u1/v.mp4"]);
    }

    #[tokio::test]
    async fn test_unlistable_blob_prefix_is_recorded() {
        let test = TestBackends::default();
        seed_user(&test).await;
        let backends = Backends::new(
            Arc::new(test.documents.clone()),
            Arc::new(FailingBlobs::new(test.blobs.clone(), "videos/u1")),
            Arc::new(test.identity.clone()),
        );

        let report = orchestrator(&backends)
            .delete("u1", KEEP_ACCOUNT)
            .await
            .unwrap();

        assert_eq!(report.storage, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to list videos/u1"));
    }

    #[tokio::test]
    async fn test_every_primary_record_of_the_user_is_removed() {
        let test = TestBackends::default();
        seed_user(&test).await;
        // duplicate created under a generated key
        test.documents
            .set("users", "docX", doc(json!({"id": "u1", "name": "dup"})))
            .await
            .unwrap();
        test.documents
            .set("tasks", "x1", doc(json!({"userId": "docX"})))
            .await
            .unwrap();
        let deletion = orchestrator(&test.backends());

        let report = deletion.delete("u1", KEEP_ACCOUNT).await.unwrap();

        assert_eq!(report.users, 2);
        assert_eq!(report.collections.get("tasks"), Some(&4));
        assert!(test.documents.documents("users").await.is_empty());
        assert_eq!(deletion.resolver.lookup("u1").await.unwrap(), None);

        let again = deletion.delete("u1", KEEP_ACCOUNT).await.unwrap();
        assert_eq!(again.users, 0);
    }

    #[tokio::test]
    async fn test_identity_failure_is_recorded() {
        let test = TestBackends::default();
        let mut identity = MockIdentity::new();
        identity
            .expect_delete_account()
            .withf(|uid| uid == "u1")
            .times(1)
            .returning(|_| {
                Err(IdentityError::Unexpected {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            });
        let backends = Backends::new(
            Arc::new(test.documents.clone()),
            test.blobs.clone(),
            Arc::new(identity),
        );

        let report = orchestrator(&backends)
            .delete("u1", DeletionOptions::default())
            .await
            .unwrap();

        assert_eq!(report.auth, AccountOutcome::Failed);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_account_step_can_be_skipped() {
        let test = TestBackends::default();
        let mut identity = MockIdentity::new();
        identity.expect_delete_account().never();
        let backends = Backends::new(
            Arc::new(test.documents.clone()),
            test.blobs.clone(),
            Arc::new(identity),
        );

        let report = orchestrator(&backends)
            .delete("u1", KEEP_ACCOUNT)
            .await
            .unwrap();
        assert_eq!(report.auth, AccountOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_empty_user_id_is_rejected() {
        let test = TestBackends::default();
        assert!(matches!(
            orchestrator(&test.backends())
                .delete("", DeletionOptions::default())
                .await,
            Err(ReconcileError::MissingUserId)
        ));
    }
}
