mod datastore;
mod error;
mod storage;
mod transaction;

pub use datastore::BoardDataStore;
pub use datastore::TaskDataStore;
pub use error::DataStoreError;
pub use storage::{
    connect, is_valid_key, Backlog, Change, Database, DbPath, PathPattern, WriteListener,
};
pub use storage::{MemoryDatabase, StorageError};
pub use transaction::transaction;
