use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, info_span};
use tracing_futures::Instrument;

use crate::config::RetryConfig;
use crate::datastore::{transaction, Change, DataStoreError, Database, WriteListener};
use crate::model::board::counter_path_for;

/// Existence transition of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Deleted,
    Modified,
}

impl Transition {
    /// `None` when the record neither existed before nor after.
    pub fn of(change: &Change) -> Option<Self> {
        match (change.before.is_some(), change.after.is_some()) {
            (false, true) => Some(Transition::Created),
            (true, false) => Some(Transition::Deleted),
            (true, true) => Some(Transition::Modified),
            (false, false) => None,
        }
    }

    pub fn delta(&self) -> i64 {
        match self {
            Transition::Created => 1,
            Transition::Deleted => -1,
            Transition::Modified => 0,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Created => f.write_str("created"),
            Transition::Deleted => f.write_str("deleted"),
            Transition::Modified => f.write_str("modified"),
        }
    }
}

pub fn build_runtime<D: Database>(
    db: Arc<D>,
    listener: WriteListener,
    retry: RetryConfig,
) -> anyhow::Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .thread_name("trigger")
        .enable_all()
        .build()?;

    runtime.handle().spawn(handle_triggers(db, listener, retry));
    Ok(runtime)
}

pub async fn handle_triggers<D: Database>(
    db: Arc<D>,
    mut listener: WriteListener,
    retry: RetryConfig,
) {
    info!("Starting trigger loop...");
    let backlog = listener.backlog();
    while let Some(change) = listener.recv().await {
        let db = db.clone();
        let backlog = backlog.clone();
        let retry = retry.clone();
        let span = info_span!(
            "count_tasks",
            board = change.params.get("board").map(String::as_str).unwrap_or_default(),
            task = change.params.get("task").map(String::as_str).unwrap_or_default(),
        );
        tokio::spawn(
            async move {
                match count_tasks(db.as_ref(), &change, &retry).await {
                    Ok(Some(count)) => debug!(count, "Counter updated."),
                    Ok(None) => debug!("Counter unchanged."),
                    Err(err) => {
                        error!(reason = %err, path = %change.path, "Unable to update task counter.")
                    }
                }
                backlog.complete();
            }
            .instrument(span),
        );
    }
    info!("Finishing trigger loop...");
}

/// Applies the change's delta to the board counter; returns the new count if it was written.
pub async fn count_tasks<D: Database + ?Sized>(
    db: &D,
    change: &Change,
    retry: &RetryConfig,
) -> Result<Option<i64>, DataStoreError> {
    let transition = match Transition::of(change) {
        Some(transition) => transition,
        None => return Ok(None),
    };
    let delta = transition.delta();
    if delta == 0 {
        return Ok(None);
    }
    debug!(transition = %transition, "task transition");

    let counter = counter_path_for(&change.path);
    let next = transaction(db, &counter, retry, |current| {
        let current = current.and_then(Value::as_i64).unwrap_or(0);
        Some(json!(current + delta))
    })
    .await?;
    Ok(next.as_ref().and_then(Value::as_i64))
}
