use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{error, info, instrument};

use super::{StoreError, WorkerStore};
use crate::worker::Worker;

const CREATE_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS workers (
        username    TEXT        PRIMARY KEY,
        first_name  TEXT        NOT NULL DEFAULT '',
        last_name   TEXT        NOT NULL DEFAULT '',
        city        TEXT        NOT NULL DEFAULT '',
        division    TEXT        NOT NULL DEFAULT '',
        position    TEXT        NOT NULL DEFAULT '',
        salary      BIGINT      NOT NULL DEFAULT 0,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL,
        deleted_at  TIMESTAMPTZ,
        version     INTEGER     NOT NULL DEFAULT 1
    )";

/// PostgreSQL-backed worker store.
///
/// Soft-deleted rows stay in the `workers` table with `deleted_at` set.
/// Writes run in their own transaction at the server's default isolation
/// level and are rolled back on any failure.
#[derive(Debug, Clone)]
pub struct PgWorkerStore {
    pool: PgPool,
}

impl PgWorkerStore {
    /// Opens a connection pool. Every pooled session uses `timezone`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str, pool_size: u32, timezone: &str) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(url)?.options([("TimeZone", timezone)]);
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;
        info!(pool_size, "connected to postgres");
        Ok(Self { pool })
    }
}

/// Rolls `tx` back, logging (not propagating) a failed rollback so the
/// original error reaches the caller.
async fn rollback(tx: Transaction<'_, Postgres>, username: &str) {
    if let Err(e) = tx.rollback().await {
        error!(username, "transaction rollback failed: {e}");
    }
}

#[async_trait]
impl WorkerStore for PgWorkerStore {
    #[instrument(skip(self), err)]
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get(&self, username: &str) -> Result<Option<Worker>, StoreError> {
        let worker = sqlx::query_as("SELECT * FROM workers WHERE username = $1 AND deleted_at IS NULL")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(worker)
    }

    #[instrument(skip(self), err)]
    async fn exists_any_scope(&self, username: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM workers WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        let workers = sqlx::query_as("SELECT * FROM workers WHERE deleted_at IS NULL ORDER BY username")
            .fetch_all(&self.pool)
            .await?;
        Ok(workers)
    }

    #[instrument(skip_all, fields(username = %worker.username), err)]
    async fn insert(&self, worker: Worker) -> Result<Worker, StoreError> {
        let query = "
            INSERT INTO workers
                (username, first_name, last_name, city, division, position, salary,
                 created_at, updated_at, deleted_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL, $10)
            RETURNING *";

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, Worker>(query)
            .bind(&worker.username)
            .bind(&worker.first_name)
            .bind(&worker.last_name)
            .bind(&worker.city)
            .bind(&worker.division)
            .bind(&worker.position)
            .bind(worker.salary)
            .bind(worker.created_at)
            .bind(worker.updated_at)
            .bind(worker.version)
            .fetch_one(&mut *tx)
            .await;

        match inserted {
            Ok(row) => {
                tx.commit().await?;
                Ok(row)
            }
            Err(e) => {
                rollback(tx, &worker.username).await;
                match e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => {
                        Err(StoreError::AlreadyExists(worker.username))
                    }
                    e => Err(e.into()),
                }
            }
        }
    }

    #[instrument(skip(self, worker), err)]
    async fn update(&self, username: &str, worker: Worker) -> Result<Worker, StoreError> {
        let query = "
            UPDATE workers
            SET first_name = $2, last_name = $3, city = $4, division = $5,
                position = $6, salary = $7, updated_at = $8, version = version + 1
            WHERE username = $1 AND deleted_at IS NULL AND version = $9
            RETURNING *";

        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, Worker>(query)
            .bind(username)
            .bind(&worker.first_name)
            .bind(&worker.last_name)
            .bind(&worker.city)
            .bind(&worker.division)
            .bind(&worker.position)
            .bind(worker.salary)
            .bind(Utc::now())
            .bind(worker.version)
            .fetch_optional(&mut *tx)
            .await;

        match updated {
            Ok(Some(row)) => {
                tx.commit().await?;
                Ok(row)
            }
            Ok(None) => {
                rollback(tx, username).await;
                Err(StoreError::StaleVersion(username.to_owned()))
            }
            Err(e) => {
                rollback(tx, username).await;
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn soft_delete(&self, username: &str) -> Result<(), StoreError> {
        let query = "
            UPDATE workers
            SET deleted_at = $2, version = version + 1
            WHERE username = $1 AND deleted_at IS NULL";

        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(query)
            .bind(username)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await;

        match deleted {
            Ok(done) if done.rows_affected() == 0 => {
                rollback(tx, username).await;
                Err(StoreError::NotFound(username.to_owned()))
            }
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                rollback(tx, username).await;
                Err(e.into())
            }
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        info!("postgres pool closed");
        Ok(())
    }
}
