use serde_json::Value;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;

use super::{DataStoreError, Database, DbPath, StorageError};
use crate::config::RetryConfig;

pub fn retry_strategy(config: &RetryConfig) -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(config.interval_ms)
        .max_delay(Duration::from_millis(config.max_interval_ms))
        .map(jitter)
        .take(config.max_retries as usize)
}

/// Atomic read-modify-write of a single node.
///
/// `update` computes the next value purely from the current one (`None` when
/// absent) and may run several times: the write is a compare-and-set against
/// the value read, retried with backoff while it conflicts.
pub async fn transaction<D, F>(
    db: &D,
    path: &DbPath,
    config: &RetryConfig,
    update: F,
) -> Result<Option<Value>, DataStoreError>
where
    D: Database + ?Sized,
    F: Fn(Option<&Value>) -> Option<Value> + Send + Sync,
{
    let update = &update;
    let attempt = || async move {
        let current = db.get(path).await?;
        let next = update(current.as_ref());
        db.compare_and_set(path, current.as_ref(), next.clone())
            .await?;
        Ok::<_, StorageError>(next)
    };
    let on_conflict = |err: &StorageError| {
        let conflict = matches!(err, StorageError::Conflict(_));
        if conflict {
            debug!(path = %path, "transaction conflict, retrying");
        }
        conflict
    };

    RetryIf::start(retry_strategy(config), attempt, on_conflict)
        .await
        .map_err(|source| DataStoreError::Transaction {
            path: path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{MemoryDatabase, PathPattern, WriteListener};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn increment(current: Option<&Value>) -> Option<Value> {
        Some(json!(current.and_then(Value::as_i64).unwrap_or(0) + 1))
    }

    /// Loses the first `conflicts` compare-and-set calls.
    struct ContendedDatabase {
        inner: MemoryDatabase,
        conflicts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Database for ContendedDatabase {
        async fn get(&self, path: &DbPath) -> Result<Option<Value>, StorageError> {
            self.inner.get(path).await
        }
        async fn set(&self, path: &DbPath, value: Value) -> Result<(), StorageError> {
            self.inner.set(path, value).await
        }
        async fn update(&self, path: &DbPath, fields: Map<String, Value>) -> Result<(), StorageError> {
            self.inner.update(path, fields).await
        }
        async fn remove(&self, path: &DbPath) -> Result<(), StorageError> {
            self.inner.remove(path).await
        }
        async fn compare_and_set(
            &self,
            path: &DbPath,
            expected: Option<&Value>,
            value: Option<Value>,
        ) -> Result<(), StorageError> {
            let lost = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StorageError::Conflict(path.clone()));
            }
            self.inner.compare_and_set(path, expected, value).await
        }
        fn push_key(&self) -> String {
            self.inner.push_key()
        }
        fn on_write(&self, pattern: PathPattern) -> WriteListener {
            self.inner.on_write(pattern)
        }
    }

    #[tokio::test]
    async fn test_missing_value_defaults() {
        let db = MemoryDatabase::new();
        let path = DbPath::parse("/boards/Sales/num_tasks").unwrap();

        let next = transaction(&db, &path, &RetryConfig::default(), increment)
            .await
            .unwrap();

        assert_eq!(next, Some(json!(1)));
        assert_eq!(db.get(&path).await.unwrap(), Some(json!(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_converge() {
        // GIVEN
        let db = Arc::new(MemoryDatabase::new());
        let path = DbPath::parse("/boards/Sales/num_tasks").unwrap();
        let config = RetryConfig::new(200, 1, 5);

        // WHEN
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let db = db.clone();
                let path = path.clone();
                let config = config.clone();
                tokio::spawn(async move { transaction(&*db, &path, &config, increment).await })
            })
            .collect();
        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        // THEN
        assert_eq!(db.get(&path).await.unwrap(), Some(json!(100)));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        // GIVEN
        let db = ContendedDatabase {
            inner: MemoryDatabase::new(),
            conflicts: AtomicUsize::new(3),
        };
        let path = DbPath::parse("/boards/Sales/num_tasks").unwrap();

        // WHEN
        let next = transaction(&db, &path, &RetryConfig::new(5, 1, 2), increment)
            .await
            .unwrap();

        // THEN
        assert_eq!(next, Some(json!(1)));
        assert_eq!(db.conflicts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        // GIVEN
        let db = ContendedDatabase {
            inner: MemoryDatabase::new(),
            conflicts: AtomicUsize::new(10),
        };
        let path = DbPath::parse("/boards/Sales/num_tasks").unwrap();

        // WHEN
        let err = transaction(&db, &path, &RetryConfig::new(2, 1, 2), increment)
            .await
            .unwrap_err();

        // THEN
        assert_eq!(
            err,
            DataStoreError::Transaction {
                path: path.clone(),
                source: StorageError::Conflict(path.clone()),
            }
        );
        assert_eq!(db.get(&path).await.unwrap(), None);
    }
}
