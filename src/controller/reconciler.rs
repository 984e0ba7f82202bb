use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::datastore::{transaction, Backlog, DataStoreError, Database};
use crate::model::BoardRef;

/// Outcome of recounting one board.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub board: String,
    pub counted: i64,
    pub stored: Option<i64>,
    pub repaired: bool,
    /// Counter changes were still in flight; nothing was written.
    pub deferred: bool,
    pub checked_at: DateTime<Utc>,
}

/// Recounts the board's task records and overwrites a counter that drifted.
///
/// The recount is only written while `backlog` has no pending change, before
/// the read and at the compare-and-set; otherwise the report is deferred.
pub async fn reconcile_board<D: Database + ?Sized>(
    db: &D,
    board: &BoardRef,
    retry: &RetryConfig,
    backlog: &Backlog,
) -> Result<ReconciliationReport, DataStoreError> {
    let emitted = backlog.emitted();
    if backlog.completed() != emitted {
        return Ok(ReconciliationReport::deferred(board, None));
    }

    let tasks_path = board.tasks_path();
    let tasks = db
        .get(&tasks_path)
        .await
        .map_err(|source| DataStoreError::Read {
            path: tasks_path.clone(),
            source,
        })?;
    let counted = match tasks {
        Some(Value::Object(records)) => records.values().filter(|v| v.is_object()).count() as i64,
        _ => 0,
    };

    // a trigger landing after the check conflicts with this write and is seen on retry
    let counter = board.counter_path();
    let observed = parking_lot::Mutex::new((None, false, false));
    transaction(db, &counter, retry, |value| {
        let current = value.and_then(Value::as_i64);
        if backlog.emitted() != emitted {
            *observed.lock() = (current, false, true);
            return value.cloned();
        }
        *observed.lock() = (current, current != Some(counted), false);
        Some(json!(counted))
    })
    .await?;
    let (stored, repaired, deferred) = *observed.lock();
    if deferred {
        return Ok(ReconciliationReport::deferred(board, stored));
    }

    Ok(ReconciliationReport {
        board: board.name().to_string(),
        counted,
        stored,
        repaired,
        deferred,
        checked_at: Utc::now(),
    })
}

impl ReconciliationReport {
    fn deferred(board: &BoardRef, stored: Option<i64>) -> Self {
        Self {
            board: board.name().to_string(),
            counted: 0,
            stored,
            repaired: false,
            deferred: true,
            checked_at: Utc::now(),
        }
    }
}

pub fn build_runtime<D: Database>(
    db: Arc<D>,
    boards: Vec<BoardRef>,
    interval: Duration,
    retry: RetryConfig,
    backlog: Arc<Backlog>,
) -> anyhow::Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("reconciler")
        .enable_all()
        .build()?;

    runtime
        .handle()
        .spawn(reconcile_loop(db, boards, interval, retry, backlog));
    Ok(runtime)
}

async fn reconcile_loop<D: Database>(
    db: Arc<D>,
    boards: Vec<BoardRef>,
    interval: Duration,
    retry: RetryConfig,
    backlog: Arc<Backlog>,
) {
    info!(interval = %humantime::format_duration(interval), "Starting reconciler loop...");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        for board in boards.iter() {
            match reconcile_board(db.as_ref(), board, &retry, &backlog).await {
                Ok(report) if report.deferred => {
                    debug!(board = report.board.as_str(), "Counter changes pending, recount deferred.")
                }
                Ok(report) if report.repaired => warn!(
                    board = report.board.as_str(),
                    counted = report.counted,
                    stored = ?report.stored,
                    "Task counter repaired."
                ),
                Ok(report) => info!(
                    board = report.board.as_str(),
                    counted = report.counted,
                    "Task counter consistent."
                ),
                Err(err) => error!(reason = %err, board = %board, "Unable to reconcile board."),
            }
        }
    }
}
