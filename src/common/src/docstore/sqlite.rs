use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};

use super::{
    Document, DocumentSnapshot, DocumentStore, FieldPath, StoreError, Transaction, WriteBatch,
    WriteOp, check_batch_size,
};

/// Document store backed by a single SQLite table with JSON bodies
#[derive(Clone, Debug)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    max_batch_size: usize,
}

impl SqliteDocumentStore {
    /// Connect and create the schema if needed.
    ///
    /// In-memory databases are bound to a single connection that is never
    /// recycled, otherwise every pooled connection would see its own empty
    /// database.
    pub async fn connect(dsn: &str, max_batch_size: usize) -> Result<Self, StoreError> {
        log::info!("Connecting to document database with DSN: {dsn}");

        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            log::error!("Failed to connect to SQLite database with DSN '{dsn}': {e}");
            e
        })?;

        let store = Self {
            pool,
            max_batch_size,
        };
        store.init().await?;
        log::info!("Document database schema initialized");
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        let create_documents = r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )"#;
        sqlx::query(create_documents).execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite JSON path for a field path, e.g. `$."profile"."imageUrl"`
fn json_path(field: &FieldPath) -> String {
    let mut path = String::from("$");
    for segment in field.segments() {
        path.push_str(".\"");
        path.push_str(&segment.replace('"', "\\\""));
        path.push('"');
    }
    path
}

fn decode(raw: &str) -> Result<Document, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

async fn fetch_document(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> Result<Option<Document>, StoreError> {
    let row = sqlx::query("SELECT data FROM documents WHERE collection = ? AND id = ?")
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| decode(&row.try_get::<String, _>("data")?))
        .transpose()
}

async fn apply_writes(conn: &mut SqliteConnection, ops: Vec<WriteOp>) -> Result<(), StoreError> {
    for op in ops {
        let current = fetch_document(conn, op.collection(), op.id()).await?;
        match op.apply(current)? {
            Some(doc) => {
                sqlx::query(
                    "INSERT INTO documents (collection, id, data) VALUES (?, ?, ?) \
                     ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data",
                )
                .bind(op.collection())
                .bind(op.id())
                .bind(serde_json::to_string(&doc)?)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                    .bind(op.collection())
                    .bind(op.id())
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_document(&mut conn, collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        field: &FieldPath,
        value: &Value,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT id, data FROM documents \
             WHERE collection = ? AND json_extract(data, ?) = json_extract(?, '$') \
             ORDER BY id LIMIT ?",
        )
        .bind(collection)
        .bind(json_path(field))
        .bind(serde_json::to_string(value)?)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DocumentSnapshot {
                    id: row.try_get::<String, _>("id")?,
                    data: decode(&row.try_get::<String, _>("data")?)?,
                })
            })
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        check_batch_size(batch.len(), self.max_batch_size)?;
        let mut tx = self.pool.begin().await?;
        apply_writes(&mut tx, batch.into_ops()).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction {
            tx,
            writes: Vec::new(),
            max_batch_size: self.max_batch_size,
        }))
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    writes: Vec<WriteOp>,
    max_batch_size: usize,
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        fetch_document(&mut self.tx, collection, id).await
    }

    fn buffer(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let SqliteTransaction {
            mut tx,
            writes,
            max_batch_size,
        } = *self;
        check_batch_size(writes.len(), max_batch_size)?;
        apply_writes(&mut tx, writes).await?;
        tx.commit().await?;
        Ok(())
    }
}
