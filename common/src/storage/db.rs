use crate::error::AppError;

use super::types::StoredObject;
use serde::Serialize;
use std::{ops::Deref, time::Duration};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

/// Upper bound on records sent in a single insert round trip.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

const INDEX_DEFINITIONS: &[&str] = &[
    "DEFINE INDEX IF NOT EXISTS idx_job_created ON extraction_job FIELDS created_at",
    "DEFINE INDEX IF NOT EXISTS idx_job_status ON extraction_job FIELDS status",
    "DEFINE INDEX IF NOT EXISTS idx_question_hash ON bank_question FIELDS hash UNIQUE",
    "DEFINE INDEX IF NOT EXISTS idx_question_status_created ON bank_question FIELDS status, created_at",
    "DEFINE INDEX IF NOT EXISTS idx_question_law_status ON bank_question FIELDS law, status",
    "DEFINE INDEX IF NOT EXISTS idx_question_job ON bank_question FIELDS job_id",
    "DEFINE INDEX IF NOT EXISTS idx_question_created ON bank_question FIELDS created_at",
];

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

/// Retry settings applied to each chunk of a batch write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRetryPolicy {
    /// Total attempts per chunk, including the first one.
    pub attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub item_ids: Vec<String>,
    pub error: String,
}

/// Outcome of a chunked insert. Chunks are written independently, so a report
/// can describe a partially persisted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchWriteReport {
    pub persisted_ids: Vec<String>,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl BatchWriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }

    pub fn failed_item_count(&self) -> usize {
        self.failed_chunks.iter().map(|c| c.item_ids.len()).sum()
    }
}

/// True when the store rejected a write because a unique index or record id
/// was already taken.
pub fn is_unique_violation(err: &Error) -> bool {
    let message = err.to_string();
    message.contains("already contains") || message.contains("already exists")
}

impl SurrealDbClient {
    /// # Initialize a new datbase client
    ///
    /// # Arguments
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        Self::build_indexes(self).await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        for definition in INDEX_DEFINITIONS {
            self.client.query(*definition).await?.check()?;
        }
        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject.
    /// Fails when a record with the same id already exists.
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    async fn insert_chunk<T>(&self, chunk: Vec<T>) -> Result<Vec<T>, AppError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .insert(T::table_name())
            .content(chunk)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::Conflict(err.to_string())
                } else {
                    AppError::Database(err)
                }
            })
    }

    /// Inserts `items` in chunks of at most [`MAX_BATCH_WRITE_ITEMS`].
    ///
    /// Each chunk is its own round trip and is retried while the failure is
    /// [`AppError::is_transient`]. Unique-index violations surface as
    /// `Conflict` and are not retried. Chunks that still fail are
    /// listed in the report; earlier and later chunks are unaffected.
    pub async fn store_items_in_chunks<T>(
        &self,
        items: Vec<T>,
        chunk_size: usize,
        retry: WriteRetryPolicy,
    ) -> BatchWriteReport
    where
        T: StoredObject + Clone + Send + Sync + 'static,
    {
        let chunk_size = chunk_size.clamp(1, MAX_BATCH_WRITE_ITEMS);
        let mut report = BatchWriteReport::default();

        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let item_ids: Vec<String> = chunk.iter().map(|i| i.get_id().to_string()).collect();
            let strategy = ExponentialBackoff::from_millis(retry.base_delay_ms.max(1))
                .max_delay(Duration::from_millis(retry.max_delay_ms))
                .map(jitter)
                .take(retry.attempts.saturating_sub(1));

            let result = RetryIf::spawn(
                strategy,
                || self.insert_chunk(chunk.to_vec()),
                AppError::is_transient,
            )
            .await;

            match result {
                Ok(_) => {
                    debug!(
                        table = T::table_name(),
                        chunk_index,
                        count = item_ids.len(),
                        "stored chunk"
                    );
                    report.persisted_ids.extend(item_ids);
                }
                Err(err) => {
                    warn!(
                        table = T::table_name(),
                        chunk_index,
                        count = item_ids.len(),
                        error = %err,
                        "chunk write failed"
                    );
                    report.failed_chunks.push(ChunkFailure {
                        chunk_index,
                        item_ids,
                        error: err.to_string(),
                    });
                }
            }
        }

        report
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    fn dummy(id: &str, name: &str) -> Dummy {
        Dummy {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let database = &Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn test_store_and_fetch() {
        let db = memory_db().await;
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        let item = dummy("abc", "first");
        let stored = db.store_item(item.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db.get_item::<Dummy>(&item.id).await.expect("Failed to fetch");
        assert_eq!(fetched, Some(item.clone()));

        let missing = db.get_item::<Dummy>("nope").await.expect("lookup succeeds");
        assert!(missing.is_none());

        let duplicate = db.store_item(item).await;
        assert!(matches!(duplicate, Err(ref err) if is_unique_violation(err)));
    }

    #[tokio::test]
    async fn test_build_indexes_is_repeatable() {
        let db = memory_db().await;
        db.build_indexes().await.expect("Failed to build indexes");
        db.build_indexes().await.expect("Failed to rebuild indexes");
    }

    #[tokio::test]
    async fn chunked_writes_split_large_batches() {
        let db = memory_db().await;
        let items: Vec<Dummy> = (0..60)
            .map(|i| dummy(&format!("item-{i}"), &format!("name-{i}")))
            .collect();

        let report = db
            .store_items_in_chunks(items, 100, WriteRetryPolicy::default())
            .await;

        assert!(report.is_complete());
        assert_eq!(report.persisted_ids.len(), 60);

        let mut response = db
            .client
            .query("SELECT count() AS total FROM dummy GROUP ALL")
            .await
            .expect("count query");
        let total: Option<i64> = response.take("total").expect("count column");
        assert_eq!(total, Some(60));
    }

    #[tokio::test]
    async fn failed_chunk_is_reported_without_touching_other_chunks() {
        let db = memory_db().await;
        db.client
            .query("DEFINE INDEX idx_dummy_name ON dummy FIELDS name UNIQUE")
            .await
            .expect("index defined");

        let mut items: Vec<Dummy> = (0..30)
            .map(|i| dummy(&format!("item-{i}"), &format!("name-{i}")))
            .collect();
        if let Some(last) = items.last_mut() {
            last.name = "name-2".to_string();
        }

        let report = db
            .store_items_in_chunks(items, MAX_BATCH_WRITE_ITEMS, WriteRetryPolicy::default())
            .await;

        assert_eq!(report.persisted_ids.len(), 25);
        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].chunk_index, 1);
        assert_eq!(report.failed_item_count(), 5);
        assert!(report.failed_chunks[0].error.starts_with("Conflict"));
    }

    #[tokio::test]
    async fn rejected_chunk_is_retried_then_reported() {
        let db = memory_db().await;
        db.client
            .query("DEFINE FIELD name ON dummy ASSERT $value != 'rejected'")
            .await
            .expect("field defined");

        let mut items: Vec<Dummy> = (0..3)
            .map(|i| dummy(&format!("item-{i}"), &format!("name-{i}")))
            .collect();
        items[1].name = "rejected".to_string();

        let report = db
            .store_items_in_chunks(
                items,
                1,
                WriteRetryPolicy {
                    attempts: 2,
                    base_delay_ms: 1,
                    max_delay_ms: 5,
                },
            )
            .await;

        assert_eq!(report.persisted_ids, vec!["item-0".to_string(), "item-2".to_string()]);
        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].chunk_index, 1);
        assert!(report.failed_chunks[0].error.starts_with("Database error"));
    }
}
