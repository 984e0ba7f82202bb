use thiserror::*;

use super::{DbPath, StorageError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataStoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: DbPath, source: StorageError },
    #[error("failed to write {path}: {source}")]
    Write { path: DbPath, source: StorageError },
    #[error("transaction on {path} failed: {source}")]
    Transaction { path: DbPath, source: StorageError },
}
