use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{StoreError, WorkerStore};
use crate::worker::Worker;

/// In-process worker store.
///
/// Rows live in a username-ordered map behind one lock, so each write is
/// atomic with respect to every reader. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryWorkerStore {
    rows: RwLock<BTreeMap<String, Worker>>,
}

impl MemoryWorkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, username: &str) -> Result<Option<Worker>, StoreError> {
        let rows = self.rows.read();
        Ok(rows.get(username).filter(|w| !w.is_deleted()).cloned())
    }

    async fn exists_any_scope(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.rows.read().contains_key(username))
    }

    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        let rows = self.rows.read();
        Ok(rows.values().filter(|w| !w.is_deleted()).cloned().collect())
    }

    async fn insert(&self, worker: Worker) -> Result<Worker, StoreError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&worker.username) {
            return Err(StoreError::AlreadyExists(worker.username));
        }
        rows.insert(worker.username.clone(), worker.clone());
        Ok(worker)
    }

    async fn update(&self, username: &str, worker: Worker) -> Result<Worker, StoreError> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(username)
            .filter(|row| !row.is_deleted() && row.version == worker.version)
            .ok_or_else(|| StoreError::StaleVersion(username.to_owned()))?;

        row.first_name = worker.first_name;
        row.last_name = worker.last_name;
        row.city = worker.city;
        row.division = worker.division;
        row.position = worker.position;
        row.salary = worker.salary;
        row.updated_at = Utc::now();
        row.version += 1;
        Ok(row.clone())
    }

    async fn soft_delete(&self, username: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(username)
            .filter(|row| !row.is_deleted())
            .ok_or_else(|| StoreError::NotFound(username.to_owned()))?;

        row.deleted_at = Some(Utc::now());
        row.version += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
