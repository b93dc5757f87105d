//! Test utilities for habitsync.
//!
//! In-memory backends with typed handles, so tests can seed and inspect the
//! stores the engine writes to, a blob store with injected failures, plus a
//! configuration builder.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod config_builder;
mod failing_blobs;

pub use config_builder::TestConfigBuilder;
pub use failing_blobs::FailingBlobs;

use std::sync::Arc;

use bytes::Bytes;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload, memory::InMemory,
    path::Path,
};
use serde_json::Value;

use crate::backends::Backends;
use crate::docstore::{Document, MemoryDocumentStore};
use crate::identity::MemoryIdentityProvider;

/// In-memory backends that keep their concrete types
#[derive(Clone, Debug)]
pub struct TestBackends {
    pub documents: MemoryDocumentStore,
    pub blobs: Arc<InMemory>,
    pub identity: MemoryIdentityProvider,
}

impl Default for TestBackends {
    fn default() -> Self {
        Self::new(500)
    }
}

impl TestBackends {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            documents: MemoryDocumentStore::new(max_batch_size),
            blobs: Arc::new(InMemory::new()),
            identity: MemoryIdentityProvider::new(),
        }
    }

    /// Type-erased handles sharing the same state
    pub fn backends(&self) -> Backends {
        Backends::new(
            Arc::new(self.documents.clone()),
            self.blobs.clone(),
            Arc::new(self.identity.clone()),
        )
    }

    /// Store a blob, optionally tagging it with metadata
    pub async fn put_blob(&self, path: &str, content: &'static [u8], metadata: &[(&str, &str)]) {
        let mut attributes = Attributes::new();
        for (key, value) in metadata {
            attributes.insert(
                Attribute::Metadata(key.to_string().into()),
                AttributeValue::from(value.to_string()),
            );
        }
        self.blobs
            .put_opts(
                &Path::from(path),
                PutPayload::from(Bytes::from_static(content)),
                PutOptions {
                    attributes,
                    ..Default::default()
                },
            )
            .await
            .expect("put blob");
    }

    /// Every object path under a prefix, sorted
    pub async fn blob_paths(&self, prefix: &str) -> Vec<String> {
        use futures::TryStreamExt;

        let prefix = Path::from(prefix);
        let mut paths: Vec<String> = self
            .blobs
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .expect("list blobs");
        paths.sort();
        paths
    }
}

/// Build a document from a `json!` object literal
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
