use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::debug;

use super::error::StorageError;
use super::{
    is_valid_key, Backlog, Change, Database, DbPath, PathPattern, PushIdGenerator, WriteListener,
};

struct Listener {
    id: u64,
    pattern: PathPattern,
    tx: UnboundedSender<Change>,
    backlog: Arc<Backlog>,
}

struct Inner {
    root: Value,
    listeners: Vec<Listener>,
    next_listener_id: u64,
}

/// In-process hierarchical store holding a single JSON tree.
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
    push_ids: PushIdGenerator,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                root: Value::Object(Map::new()),
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
            push_ids: PushIdGenerator::new(),
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Applies a write under the lock and notifies the listeners whose nodes changed.
    ///
    /// Notifications are sent while the lock is held, so every listener sees
    /// changes in write order.
    fn write<F>(&self, path: &DbPath, apply: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut inner = self.inner.lock();

        let before: Vec<BTreeMap<DbPath, Option<Value>>> = inner
            .listeners
            .iter()
            .map(|listener| snapshot(&inner.root, &listener.pattern, path))
            .collect();

        apply(&mut inner.root);

        let Inner {
            root, listeners, ..
        } = &mut *inner;
        let mut closed = Vec::new();
        for (listener, mut nodes) in listeners.iter().zip(before.into_iter()) {
            for changed in affected(root, &listener.pattern, path) {
                nodes.entry(changed).or_insert(None);
            }
            for (node_path, before) in nodes.into_iter() {
                let after = node(root, &node_path).cloned();
                if before == after {
                    continue;
                }
                let params = listener.pattern.matches(&node_path).unwrap_or_default();
                let change = Change {
                    path: node_path,
                    params,
                    before,
                    after,
                };
                listener.backlog.emit();
                if listener.tx.send(change).is_err() {
                    closed.push(listener.id);
                    break;
                }
            }
        }
        listeners.retain(|listener| !closed.contains(&listener.id));
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryDatabase")
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StorageError> {
        let inner = self.inner.lock();
        Ok(node(&inner.root, path).cloned())
    }

    async fn set(&self, path: &DbPath, value: Value) -> Result<(), StorageError> {
        validate_keys(&value)?;
        let value = normalize(value);
        self.write(path, |root| write_node(root, path.segments(), value));
        Ok(())
    }

    async fn update(&self, path: &DbPath, fields: Map<String, Value>) -> Result<(), StorageError> {
        if let Some(key) = fields.keys().find(|key| !is_valid_key(key)) {
            return Err(StorageError::InvalidKey(key.clone()));
        }
        fields.values().try_for_each(validate_keys)?;
        self.write(path, |root| {
            for (key, value) in fields.into_iter() {
                write_node(root, path.child(&key).segments(), normalize(value));
            }
        });
        Ok(())
    }

    async fn remove(&self, path: &DbPath) -> Result<(), StorageError> {
        self.write(path, |root| write_node(root, path.segments(), None));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        path: &DbPath,
        expected: Option<&Value>,
        value: Option<Value>,
    ) -> Result<(), StorageError> {
        if let Some(value) = value.as_ref() {
            validate_keys(value)?;
        }
        {
            let inner = self.inner.lock();
            if node(&inner.root, path) != expected {
                return Err(StorageError::Conflict(path.clone()));
            }
        }
        // re-checked under the write lock, the read above only avoids
        // snapshotting listeners for a write that cannot happen
        let value = value.and_then(normalize);
        let mut conflict = false;
        self.write(path, |root| {
            if node(root, path) == expected {
                write_node(root, path.segments(), value);
            } else {
                conflict = true;
            }
        });
        if conflict {
            return Err(StorageError::Conflict(path.clone()));
        }
        Ok(())
    }

    fn push_key(&self) -> String {
        self.push_ids.next()
    }

    fn on_write(&self, pattern: PathPattern) -> WriteListener {
        let (tx, rx) = unbounded_channel();
        let backlog = Arc::new(Backlog::default());
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.listeners.push(Listener {
                id,
                pattern: pattern.clone(),
                tx,
                backlog: backlog.clone(),
            });
            id
        };
        debug!(pattern = %pattern, id, "write listener registered");

        let registry: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        WriteListener::new(rx, backlog, move || {
            if let Some(inner) = registry.upgrade() {
                inner.lock().listeners.retain(|listener| listener.id != id);
                debug!(id, "write listener removed");
            }
        })
    }
}

fn validate_keys(value: &Value) -> Result<(), StorageError> {
    if let Value::Object(map) = value {
        for (key, child) in map.iter() {
            if !is_valid_key(key) {
                return Err(StorageError::InvalidKey(key.clone()));
            }
            validate_keys(child)?;
        }
    }
    Ok(())
}

/// `null` and empty objects are absent values.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, value)| normalize(value).map(|value| (key, value)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

fn node<'a>(root: &'a Value, path: &DbPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |node, key| node.as_object()?.get(key))
        .filter(|node| !is_empty_root(node))
}

fn is_empty_root(node: &Value) -> bool {
    matches!(node, Value::Object(map) if map.is_empty())
}

/// Sets or removes the node at `segments`, pruning ancestors left empty.
fn write_node(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((key, rest)) = segments.split_first() else {
        *node = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };

    if value.is_none() && !node.is_object() {
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None => {
                map.remove(key);
            }
        }
        return;
    }

    let removing = value.is_none();
    if removing && !map.contains_key(key) {
        return;
    }
    let child = map
        .entry(key.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    write_node(child, rest, value);
    if is_empty_root(child) {
        map.remove(key);
    }
}

/// Concrete paths of listener-depth nodes a write at `path` may touch.
fn affected(root: &Value, pattern: &PathPattern, path: &DbPath) -> Vec<DbPath> {
    let depth = pattern.len();
    if path.len() >= depth {
        let prefix = path.truncate(depth);
        return match pattern.matches(&prefix) {
            Some(_) => vec![prefix],
            None => vec![],
        };
    }
    if !pattern.matches_prefix(path) {
        return vec![];
    }
    let mut found = Vec::new();
    if let Some(start) = node(root, path) {
        collect(start, path.clone(), pattern, &mut found);
    }
    found
}

fn collect(node: &Value, at: DbPath, pattern: &PathPattern, found: &mut Vec<DbPath>) {
    if at.len() == pattern.len() {
        if pattern.matches(&at).is_some() {
            found.push(at);
        }
        return;
    }
    if !pattern.matches_prefix(&at) {
        return;
    }
    if let Value::Object(map) = node {
        for (key, child) in map.iter() {
            collect(child, at.child(key), pattern, found);
        }
    }
}

fn snapshot(root: &Value, pattern: &PathPattern, path: &DbPath) -> BTreeMap<DbPath, Option<Value>> {
    affected(root, pattern, path)
        .into_iter()
        .map(|node_path| {
            let value = node(root, &node_path).cloned();
            (node_path, value)
        })
        .collect()
}
