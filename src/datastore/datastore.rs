use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::{error::DataStoreError, Database, StorageError};
use crate::model::{BoardRef, Fields, Task, TaskId};

#[async_trait::async_trait]
pub trait TaskDataStore: Send + Sync + 'static {
    async fn create_task(&self, board: &BoardRef, fields: Fields) -> Result<Task, DataStoreError>;
    async fn list_tasks(&self, board: &BoardRef) -> Result<Vec<Task>, DataStoreError>;
    /// Merges `fields` into the task; a task that does not exist yet is created.
    async fn update_task(
        &self,
        board: &BoardRef,
        id: &TaskId,
        fields: Fields,
    ) -> Result<(), DataStoreError>;
    /// Removing a task that does not exist succeeds.
    async fn delete_task(&self, board: &BoardRef, id: &TaskId) -> Result<(), DataStoreError>;
    async fn task_count(&self, board: &BoardRef) -> Result<i64, DataStoreError>;
}

/// Tasks laid out per board under `/boards/<board>/tasks/<id>`.
pub struct BoardDataStore<D: Database> {
    db: Arc<D>,
}

impl<D> BoardDataStore<D>
where
    D: Database,
{
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<D> TaskDataStore for BoardDataStore<D>
where
    D: Database,
{
    async fn create_task(&self, board: &BoardRef, fields: Fields) -> Result<Task, DataStoreError> {
        let key = self.db.push_key();
        let id = TaskId::parse(&key).map_err(|_| DataStoreError::Write {
            path: board.tasks_path(),
            source: StorageError::InvalidKey(key.clone()),
        })?;
        let path = board.task_path(&id);
        let task = Task::new(&id, fields);

        self.db
            .set(&path, task.clone().into_value())
            .await
            .map_err(|source| DataStoreError::Write {
                path: path.clone(),
                source,
            })?;
        info!(board = %board, id = %id, "task created");
        Ok(task)
    }

    async fn list_tasks(&self, board: &BoardRef) -> Result<Vec<Task>, DataStoreError> {
        let path = board.tasks_path();
        let snapshot = self
            .db
            .get(&path)
            .await
            .map_err(|source| DataStoreError::Read {
                path: path.clone(),
                source,
            })?;

        let records = match snapshot {
            Some(Value::Object(records)) => records,
            Some(_) => {
                warn!(path = %path, "task collection is not an object");
                return Ok(vec![]);
            }
            None => return Ok(vec![]),
        };

        let mut tasks = Vec::with_capacity(records.len());
        for (key, record) in records.into_iter() {
            match Task::from_value(record) {
                Some(task) => tasks.push(task),
                None => warn!(board = %board, key = key.as_str(), "skipping malformed task record"),
            }
        }
        Ok(tasks)
    }

    async fn update_task(
        &self,
        board: &BoardRef,
        id: &TaskId,
        fields: Fields,
    ) -> Result<(), DataStoreError> {
        let path = board.task_path(id);
        let fields = Task::new(id, fields).into_fields();

        self.db
            .update(&path, fields)
            .await
            .map_err(|source| DataStoreError::Write {
                path: path.clone(),
                source,
            })?;
        info!(board = %board, id = %id, "task updated");
        Ok(())
    }

    async fn delete_task(&self, board: &BoardRef, id: &TaskId) -> Result<(), DataStoreError> {
        let path = board.task_path(id);
        self.db
            .remove(&path)
            .await
            .map_err(|source| DataStoreError::Write {
                path: path.clone(),
                source,
            })?;
        info!(board = %board, id = %id, "task deleted");
        Ok(())
    }

    async fn task_count(&self, board: &BoardRef) -> Result<i64, DataStoreError> {
        let path = board.counter_path();
        let count = self
            .db
            .get(&path)
            .await
            .map_err(|source| DataStoreError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(count.as_ref().and_then(Value::as_i64).unwrap_or(0))
    }
}
