mod error;
mod memory;
mod path;
mod push_id;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

pub use error::StorageError;
pub use memory::MemoryDatabase;
pub use path::{is_valid_key, DbPath, PathPattern};
pub use push_id::PushIdGenerator;

// Storage
#[async_trait::async_trait]
pub trait Database: Sync + Send + 'static {
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StorageError>;
    async fn set(&self, path: &DbPath, value: Value) -> Result<(), StorageError>;
    /// Merges the top-level keys of `fields` into the node; `null` removes a key.
    async fn update(&self, path: &DbPath, fields: Map<String, Value>) -> Result<(), StorageError>;
    async fn remove(&self, path: &DbPath) -> Result<(), StorageError>;
    /// Writes `value` only if the node still holds `expected`, otherwise `Conflict`.
    async fn compare_and_set(
        &self,
        path: &DbPath,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> Result<(), StorageError>;
    fn push_key(&self) -> String;
    fn on_write(&self, pattern: PathPattern) -> WriteListener;
}

/// Before and after snapshots of a single node matching a listener's pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: DbPath,
    pub params: HashMap<String, String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Changes delivered to a listener versus changes its consumer has applied.
///
/// `emitted` grows under the store's write lock, so a reader that sees
/// `emitted == completed` knows no delivered change is still pending.
#[derive(Debug, Default)]
pub struct Backlog {
    emitted: AtomicU64,
    completed: AtomicU64,
}

impl Backlog {
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_drained(&self) -> bool {
        self.completed() == self.emitted()
    }

    /// Marks one received change as handled, whether or not handling succeeded.
    pub fn complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self) {
        self.emitted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Subscription to changes under a pattern; unsubscribes on drop.
pub struct WriteListener {
    rx: UnboundedReceiver<Change>,
    backlog: Arc<Backlog>,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WriteListener {
    pub fn new<F>(rx: UnboundedReceiver<Change>, backlog: Arc<Backlog>, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            rx,
            backlog,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn backlog(&self) -> Arc<Backlog> {
        self.backlog.clone()
    }

    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }
}

impl Drop for WriteListener {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for WriteListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WriteListener")
    }
}

pub fn connect(url: &Url) -> Result<MemoryDatabase, StorageError> {
    match url.scheme() {
        "memory" => Ok(MemoryDatabase::new()),
        other => Err(StorageError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect() {
        let db = connect(&Url::parse("memory://").unwrap()).unwrap();
        assert_eq!(format!("{:?}", db), "MemoryDatabase { listeners: 0 }");
        let err = connect(&Url::parse("mysql://localhost:3306/boards").unwrap()).unwrap_err();
        assert_eq!(err, StorageError::UnsupportedScheme("mysql".into()));
    }

    #[tokio::test]
    async fn test_backlog_tracks_delivered_changes() {
        // GIVEN
        let db = MemoryDatabase::new();
        let pattern = PathPattern::parse("/boards/{board}/tasks/{task}").unwrap();
        let mut listener = db.on_write(pattern);
        let backlog = listener.backlog();
        let path = DbPath::parse("/boards/Sales/tasks/a").unwrap();

        // WHEN a write is delivered and nothing handled it yet
        db.set(&path, serde_json::json!({"id": "a"})).await.unwrap();
        db.set(&DbPath::parse("/boards/Sales/num_tasks").unwrap(), serde_json::json!(1))
            .await
            .unwrap();

        // THEN only the matching change is pending
        assert_eq!(backlog.emitted(), 1);
        assert!(!backlog.is_drained());

        // WHEN the consumer handles it
        assert!(listener.try_recv().is_some());
        backlog.complete();

        // THEN
        assert!(backlog.is_drained());
    }
}
