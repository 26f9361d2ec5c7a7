//! Worker persistence.
//!
//! [`WorkerStore`] is the narrow interface the handlers talk to. Two
//! implementations ship with the crate:
//!
//! | Store | Backing | Used for |
//! |---|---|---|
//! | [`PgWorkerStore`] | PostgreSQL via sqlx | production |
//! | [`MemoryWorkerStore`] | in-process map | tests, `--store memory` |
//!
//! Every write runs as one atomic unit: either the whole row change is
//! visible to other readers or none of it is.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::worker::{Worker, WorkerInput};

mod memory;
mod postgres;

pub use memory::MemoryWorkerStore;
pub use postgres::PgWorkerStore;

/// Errors surfaced by a [`WorkerStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The username is taken, by an active or a soft-deleted row.
    #[error("worker `{0}` already exists")]
    AlreadyExists(String),

    /// The row changed (or was deleted) between read and write.
    #[error("worker `{0}` was modified concurrently, retry the update")]
    StaleVersion(String),

    #[error("worker `{0}` not found")]
    NotFound(String),

    /// Connectivity, query or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage for [`Worker`] rows keyed by username.
///
/// Reads only see active rows unless stated otherwise. Implementations must
/// be safe to share across concurrently running requests.
#[async_trait]
pub trait WorkerStore: Send + Sync + 'static {
    /// Creates the backing table if it does not exist yet. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    async fn get(&self, username: &str) -> Result<Option<Worker>, StoreError>;

    /// True if any row, active or soft-deleted, holds `username`.
    async fn exists_any_scope(&self, username: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<Worker>, StoreError>;

    /// Stores a new row and returns it as persisted.
    async fn insert(&self, worker: Worker) -> Result<Worker, StoreError>;

    /// Replaces the mutable fields of the active row `username`.
    ///
    /// `worker.version` must be the version that was read; the write fails
    /// with [`StoreError::StaleVersion`] if the row moved on since.
    async fn update(&self, username: &str, worker: Worker) -> Result<Worker, StoreError>;

    /// Marks the active row `username` as deleted.
    async fn soft_delete(&self, username: &str) -> Result<(), StoreError>;

    /// Releases connections. Called once at shutdown.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Inserts each profile whose username is not present in any scope.
///
/// Returns how many rows were inserted. Running it again on a seeded store
/// inserts nothing.
#[instrument(skip_all, err)]
pub async fn seed(
    store: &dyn WorkerStore,
    profiles: impl IntoIterator<Item = WorkerInput> + Send,
) -> Result<usize, StoreError> {
    let mut inserted = 0;
    for input in profiles {
        if store.exists_any_scope(&input.username).await? {
            debug!(username = %input.username, "seed profile already present");
            continue;
        }
        store.insert(Worker::new(input)).await?;
        inserted += 1;
    }
    Ok(inserted)
}
