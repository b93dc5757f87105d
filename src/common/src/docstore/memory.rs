use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    DocumentSnapshot, DocumentStore, FieldPath, StoreError, Transaction, WriteBatch, WriteOp,
    check_batch_size,
};
use crate::docstore::Document;

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Process-local document store.
///
/// Transactions hold the store lock from `begin` until commit or drop, so
/// they are serialisable with respect to every other operation.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<Collections>>,
    max_batch_size: usize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new(500)
    }
}

impl std::fmt::Debug for MemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentStore")
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl MemoryDocumentStore {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            collections: Arc::new(Mutex::new(HashMap::new())),
            max_batch_size,
        }
    }

    /// Every document of a collection, ordered by key
    pub async fn documents(&self, collection: &str) -> Vec<DocumentSnapshot> {
        let collections = self.collections.lock().await;
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| DocumentSnapshot {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn read(collections: &Collections, collection: &str, id: &str) -> Option<Document> {
    collections.get(collection).and_then(|docs| docs.get(id)).cloned()
}

/// Stage every write first so a failing op leaves the store untouched
fn apply_writes(collections: &mut Collections, ops: Vec<WriteOp>) -> Result<(), StoreError> {
    let mut staged: HashMap<(String, String), Option<Document>> = HashMap::new();

    for op in &ops {
        let key = (op.collection().to_string(), op.id().to_string());
        let current = match staged.get(&key) {
            Some(doc) => doc.clone(),
            None => read(collections, &key.0, &key.1),
        };
        let next = op.apply(current)?;
        staged.insert(key, next);
    }

    for ((collection, id), doc) in staged {
        match doc {
            Some(doc) => {
                collections.entry(collection).or_default().insert(id, doc);
            }
            None => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }

    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.lock().await;
        Ok(read(&collections, collection, id))
    }

    async fn query(
        &self,
        collection: &str,
        field: &FieldPath,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let collections = self.collections.lock().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .iter()
            .filter(|(_, data)| field.lookup(data) == Some(value))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, data)| DocumentSnapshot {
                id: id.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        check_batch_size(batch.len(), self.max_batch_size)?;
        let mut collections = self.collections.lock().await;
        apply_writes(&mut collections, batch.into_ops())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.collections.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            guard,
            writes: Vec::new(),
            max_batch_size: self.max_batch_size,
        }))
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Collections>,
    writes: Vec<WriteOp>,
    max_batch_size: usize,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(read(&self.guard, collection, id))
    }

    fn buffer(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            mut guard,
            writes,
            max_batch_size,
        } = *self;
        check_batch_size(writes.len(), max_batch_size)?;
        apply_writes(&mut guard, writes)
    }
}
