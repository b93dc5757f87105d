use std::sync::Arc;

use common::docstore::{Document, DocumentStore, FieldPath, StoreError};
use serde_json::Value;

use crate::settings::ReconcilerSettings;

/// How a primary record was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The record key equals the requested identifier
    Key,
    /// The secondary identity field equals the requested identifier
    Field,
}

/// The canonical primary record of a user
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    /// Actual record key, which may differ from the requested identifier
    pub id: String,
    pub data: Document,
    pub matched_by: MatchKind,
}

/// Locates primary records by key or by the secondary identity field
pub struct IdentityResolver {
    documents: Arc<dyn DocumentStore>,
    collection: String,
    identity_field: FieldPath,
}

impl IdentityResolver {
    pub fn new(documents: Arc<dyn DocumentStore>, settings: &ReconcilerSettings) -> Self {
        Self {
            documents,
            collection: settings.users_collection.clone(),
            identity_field: settings.identity_field.clone(),
        }
    }

    /// Resolve the source record for a move towards `target`.
    ///
    /// Without a usable `requested` id (absent, empty or equal to `target`)
    /// the key lookup is skipped and the record whose identity field already
    /// names `target` is returned, which is how a diverged key self-heals.
    pub async fn resolve(
        &self,
        requested: Option<&str>,
        target: &str,
    ) -> Result<Option<ResolvedIdentity>, StoreError> {
        match requested {
            Some(id) if !id.is_empty() && id != target => self.lookup(id).await,
            _ => self.find_by_field(target).await,
        }
    }

    /// Key lookup first, then identity field equality
    pub async fn lookup(&self, id: &str) -> Result<Option<ResolvedIdentity>, StoreError> {
        if let Some(data) = self.documents.get(&self.collection, id).await? {
            return Ok(Some(ResolvedIdentity {
                id: id.to_string(),
                data,
                matched_by: MatchKind::Key,
            }));
        }
        self.find_by_field(id).await
    }

    /// Every primary record of `id`: the keyed one plus all whose identity
    /// field names it, each key once
    pub async fn lookup_all(&self, id: &str) -> Result<Vec<ResolvedIdentity>, StoreError> {
        let mut records = Vec::new();
        if let Some(data) = self.documents.get(&self.collection, id).await? {
            records.push(ResolvedIdentity {
                id: id.to_string(),
                data,
                matched_by: MatchKind::Key,
            });
        }
        let matches = self
            .documents
            .query(
                &self.collection,
                &self.identity_field,
                &Value::String(id.to_string()),
                None,
            )
            .await?;
        for snapshot in matches {
            if records.iter().any(|record| record.id == snapshot.id) {
                continue;
            }
            records.push(ResolvedIdentity {
                id: snapshot.id,
                data: snapshot.data,
                matched_by: MatchKind::Field,
            });
        }
        Ok(records)
    }

    async fn find_by_field(&self, id: &str) -> Result<Option<ResolvedIdentity>, StoreError> {
        let mut matches = self
            .documents
            .query(
                &self.collection,
                &self.identity_field,
                &Value::String(id.to_string()),
                Some(1),
            )
            .await?;

        Ok(matches.pop().map(|snapshot| {
            if snapshot.id != id {
                tracing::debug!(
                    requested = %id,
                    record_key = %snapshot.id,
                    "Primary record key diverges from its identity field"
                );
            }
            ResolvedIdentity {
                id: snapshot.id,
                data: snapshot.data,
                matched_by: MatchKind::Field,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::{TestBackends, doc};
    use serde_json::json;

    async fn resolver_with(records: &[(&str, Value)]) -> IdentityResolver {
        let test = TestBackends::default();
        for (key, data) in records {
            test.documents
                .set("users", key, doc(data.clone()))
                .await
                .unwrap();
        }
        let settings =
            ReconcilerSettings::from_config(&common::config::Configuration::default()).unwrap();
        IdentityResolver::new(test.backends().documents, &settings)
    }

    #[tokio::test]
    async fn test_direct_key_lookup() {
        let resolver = resolver_with(&[("guest123", json!({"id": "guest123"}))]).await;

        let resolved = resolver
            .resolve(Some("guest123"), "auth456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "guest123");
        assert_eq!(resolved.matched_by, MatchKind::Key);
    }

    #[tokio::test]
    async fn test_field_lookup_returns_actual_key() {
        let resolver = resolver_with(&[("docA1", json!({"id": "guest123"}))]).await;

        let resolved = resolver
            .resolve(Some("guest123"), "auth456")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "docA1");
        assert_eq!(resolved.matched_by, MatchKind::Field);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let resolver = resolver_with(&[]).await;
        assert!(resolver.resolve(Some("ghost"), "auth456").await.unwrap().is_none());
        assert!(resolver.lookup("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_self_heal_without_old_id_matches_target_field() {
        // key lookup on the target would find "auth456"; the field match must win
        let resolver = resolver_with(&[
            ("auth456", json!({"id": "someone-else"})),
            ("docB7", json!({"id": "auth456"})),
        ])
        .await;

        for requested in [None, Some(""), Some("auth456")] {
            let resolved = resolver.resolve(requested, "auth456").await.unwrap().unwrap();
            assert_eq!(resolved.id, "docB7");
            assert_eq!(resolved.matched_by, MatchKind::Field);
        }
    }

    #[tokio::test]
    async fn test_lookup_all_returns_every_matching_key_once() {
        let resolver = resolver_with(&[
            ("u1", json!({"id": "u1"})),
            ("docX", json!({"id": "u1"})),
            ("docY", json!({"id": "u2"})),
        ])
        .await;

        let mut keys: Vec<String> = resolver
            .lookup_all("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.id)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["docX", "u1"]);
        assert!(resolver.lookup_all("ghost").await.unwrap().is_empty());
    }
}
