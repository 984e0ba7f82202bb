pub mod board;
pub mod correlation_id;
pub mod error;
pub mod task;

pub use board::{BoardRef, BoardResolver};
pub use correlation_id::CorrelationId;
pub use error::ModelError;
pub use task::{Fields, Task, TaskId, TaskList};
