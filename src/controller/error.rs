use thiserror::Error;

use crate::datastore::DataStoreError;

// Internal controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("storage service error: {0}")]
    StorageServiceError(String),
    #[error(transparent)]
    DataStore(#[from] DataStoreError),
}
