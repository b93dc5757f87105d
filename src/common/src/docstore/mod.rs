//! Document store abstraction.
//!
//! Records are loosely-typed JSON objects addressed by `(collection, id)`.
//! The trait mirrors the operations of a managed document database: point
//! reads, single-field equality queries, atomic multi-document batches capped
//! at a fixed operation count, and read-then-write transactions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

/// A document body
pub type Document = serde_json::Map<String, Value>;

/// A document together with its key
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Document,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("Batch of {size} operations exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("Invalid field path '{0}'")]
    InvalidPath(String),
    #[error("Unsupported document store DSN: {0}. Supported: memory://, sqlite:")]
    UnsupportedDsn(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Path to a (possibly nested) field inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Single top-level field
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Parse a dotted path such as `profile.imageUrl`
    pub fn parse(dotted: &str) -> Result<Self, StoreError> {
        let segments: Vec<String> = dotted.split('.').map(String::from).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(dotted.to_string()));
        }
        Ok(Self(segments))
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Resolve this path against a document
    pub fn lookup<'a>(&self, doc: &'a Document) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut current = doc.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Sparse field-level update.
///
/// Each entry replaces the value at its path; intermediate objects are
/// created as needed and sibling fields are left untouched. Array values are
/// always replaced whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Vec<(FieldPath, Value)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` to `value`, replacing an earlier entry for the same path
    pub fn set(&mut self, path: FieldPath, value: Value) -> &mut Self {
        match self.fields.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((path, value)),
        }
        self
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        self.fields.iter().find(|(p, _)| p == path).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Value)> {
        self.fields.iter().map(|(p, v)| (p, v))
    }

    pub fn apply_to(&self, doc: &mut Document) {
        for (path, value) in &self.fields {
            let Some((leaf, parents)) = path.segments().split_last() else {
                continue;
            };
            let mut target = &mut *doc;
            for segment in parents {
                let slot = target
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Document::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Document::new());
                }
                let Value::Object(next) = slot else {
                    unreachable!("slot was just made an object");
                };
                target = next;
            }
            target.insert(leaf.clone(), value.clone());
        }
    }
}

/// Deep-merge `source` into `target`; nested objects merge, everything else replaces
pub fn merge_documents(target: &mut Document, source: Document) {
    for (key, value) in source {
        match value {
            Value::Object(incoming) => {
                if let Some(Value::Object(existing)) = target.get_mut(&key) {
                    merge_documents(existing, incoming);
                    continue;
                }
                target.insert(key, Value::Object(incoming));
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}

/// A single write inside a batch or transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    Merge {
        collection: String,
        id: String,
        data: Document,
    },
    Update {
        collection: String,
        id: String,
        patch: Patch,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Set { collection, .. }
            | WriteOp::Merge { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Set { id, .. }
            | WriteOp::Merge { id, .. }
            | WriteOp::Update { id, .. }
            | WriteOp::Delete { id, .. } => id,
        }
    }

    /// Compute the document state after this write; `None` means absent
    pub fn apply(&self, current: Option<Document>) -> Result<Option<Document>, StoreError> {
        match self {
            WriteOp::Set { data, .. } => Ok(Some(data.clone())),
            WriteOp::Merge { data, .. } => {
                let mut doc = current.unwrap_or_default();
                merge_documents(&mut doc, data.clone());
                Ok(Some(doc))
            }
            WriteOp::Update {
                collection,
                id,
                patch,
            } => {
                let mut doc = current.ok_or_else(|| StoreError::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
                patch.apply_to(&mut doc);
                Ok(Some(doc))
            }
            WriteOp::Delete { .. } => Ok(None),
        }
    }
}

/// Ordered group of writes committed atomically
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn set(&mut self, collection: &str, id: &str, data: Document) -> &mut Self {
        self.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    pub fn merge(&mut self, collection: &str, id: &str, data: Document) -> &mut Self {
        self.push(WriteOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        })
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Patch) -> &mut Self {
        self.push(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        })
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

pub(crate) fn check_batch_size(size: usize, limit: usize) -> Result<(), StoreError> {
    if size > limit {
        return Err(StoreError::BatchTooLarge { size, limit });
    }
    Ok(())
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Documents whose `field` equals `value`, ordered by key
    async fn query(
        &self,
        collection: &str,
        field: &FieldPath,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>, StoreError>;

    /// Apply every write of the batch or none of them
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Maximum number of writes accepted by one commit
    fn max_batch_size(&self) -> usize;

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, data);
        self.commit(batch).await
    }

    async fn merge(&self, collection: &str, id: &str, data: Document) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.merge(collection, id, data);
        self.commit(batch).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, patch);
        self.commit(batch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, id);
        self.commit(batch).await
    }
}

/// Read-then-write transaction.
///
/// Reads observe committed state; writes are buffered and become visible
/// atomically on `commit`. Dropping a transaction discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    fn buffer(&mut self, op: WriteOp);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn set(&mut self, collection: &str, id: &str, data: Document) {
        self.buffer(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }

    fn merge(&mut self, collection: &str, id: &str, data: Document) {
        self.buffer(WriteOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        });
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.buffer(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }
}

/// Create a document store from a DSN
pub async fn connect(
    dsn: &str,
    max_batch_size: usize,
) -> Result<Arc<dyn DocumentStore>, StoreError> {
    if dsn == "memory://" || dsn == "memory" {
        return Ok(Arc::new(MemoryDocumentStore::new(max_batch_size)));
    }
    if dsn.starts_with("sqlite:") {
        let store = SqliteDocumentStore::connect(dsn, max_batch_size).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::UnsupportedDsn(dsn.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_field_path_parse_and_lookup() {
        let path = FieldPath::parse("profile.image.url").unwrap();
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "profile.image.url");

        let data = doc(json!({"profile": {"image": {"url": "a.jpg"}}}));
        assert_eq!(path.lookup(&data), Some(&json!("a.jpg")));
        assert_eq!(FieldPath::field("missing").lookup(&data), None);

        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("").is_err());
    }

    #[test]
    fn test_patch_updates_nested_fields_without_touching_siblings() {
        let mut data = doc(json!({
            "userId": "old",
            "media": {"imageUrl": "old.jpg", "caption": "lunch"},
            "tags": ["a", "b"]
        }));

        let mut patch = Patch::new();
        patch
            .set(FieldPath::field("userId"), json!("new"))
            .set(FieldPath::parse("media.imageUrl").unwrap(), json!("new.jpg"))
            .set(FieldPath::field("tags"), json!(["c"]));
        patch.apply_to(&mut data);

        assert_eq!(
            Value::Object(data),
            json!({
                "userId": "new",
                "media": {"imageUrl": "new.jpg", "caption": "lunch"},
                "tags": ["c"]
            })
        );
    }

    #[test]
    fn test_patch_set_replaces_same_path() {
        let mut patch = Patch::new();
        patch.set(FieldPath::field("a"), json!(1));
        patch.set(FieldPath::field("a"), json!(2));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(&FieldPath::field("a")), Some(&json!(2)));
    }

    #[test]
    fn test_patch_creates_missing_parents() {
        let mut data = doc(json!({"media": "not-an-object"}));
        let mut patch = Patch::new();
        patch.set(FieldPath::parse("media.imageUrl").unwrap(), json!("x"));
        patch.set(FieldPath::parse("extra.deep.leaf").unwrap(), json!(true));
        patch.apply_to(&mut data);

        assert_eq!(data["media"], json!({"imageUrl": "x"}));
        assert_eq!(data["extra"], json!({"deep": {"leaf": true}}));
    }

    #[test]
    fn test_merge_documents_is_deep() {
        let mut target = doc(json!({"a": 1, "nested": {"x": 1, "y": 2}}));
        merge_documents(&mut target, doc(json!({"b": 2, "nested": {"y": 3}})));
        assert_eq!(
            Value::Object(target),
            json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 3}})
        );
    }

    #[test]
    fn test_update_of_absent_document_fails() {
        let op = WriteOp::Update {
            collection: "tasks".to_string(),
            id: "t1".to_string(),
            patch: Patch::new(),
        };
        let err = op.apply(None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_batch_size_check() {
        assert!(check_batch_size(500, 500).is_ok());
        assert!(matches!(
            check_batch_size(501, 500),
            Err(StoreError::BatchTooLarge {
                size: 501,
                limit: 500
            })
        ));
    }

    #[tokio::test]
    async fn test_connect_selects_backend_by_dsn() {
        let store = connect("memory://", 10).await.unwrap();
        assert_eq!(store.max_batch_size(), 10);

        let store = connect("sqlite::memory:", 20).await.unwrap();
        assert_eq!(store.max_batch_size(), 20);

        assert!(matches!(
            connect("mongodb://localhost", 10).await,
            Err(StoreError::UnsupportedDsn(_))
        ));
    }
}
