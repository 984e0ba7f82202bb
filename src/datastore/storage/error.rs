use thiserror::*;

use super::DbPath;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("concurrent modification of {0}")]
    Conflict(DbPath),

    #[error("invalid path key '{0}'")]
    InvalidKey(String),

    #[error("storage url scheme '{0}' is not supported")]
    UnsupportedScheme(String),
}
