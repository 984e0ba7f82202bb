use std::collections::HashMap;
use std::fmt;

use super::error::ModelError;
use super::task::TaskId;
use crate::config::BoardsConfig;
use crate::datastore::{is_valid_key, DbPath};

const BOARDS_ROOT: &str = "boards";
const TASKS: &str = "tasks";
const NUM_TASKS: &str = "num_tasks";

/// A storage partition holding one task collection and one counter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BoardRef {
    partition: String,
}

impl BoardRef {
    fn new(partition: &str) -> Result<Self, ModelError> {
        if !is_valid_key(partition) {
            return Err(ModelError::InvalidBoard(partition.to_string()));
        }
        Ok(Self {
            partition: partition.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.partition
    }

    pub fn path(&self) -> DbPath {
        DbPath::root().child(BOARDS_ROOT).child(&self.partition)
    }

    pub fn tasks_path(&self) -> DbPath {
        self.path().child(TASKS)
    }

    pub fn task_path(&self, id: &TaskId) -> DbPath {
        self.tasks_path().child(id.as_str())
    }

    pub fn counter_path(&self) -> DbPath {
        self.path().child(NUM_TASKS)
    }
}

impl fmt::Display for BoardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.partition)
    }
}

/// Storage pattern matching every task record of every board.
pub fn task_pattern() -> String {
    format!("/{}/{{board}}/{}/{{task}}", BOARDS_ROOT, TASKS)
}

/// Counter location for a task record path, `/boards/<board>/tasks/<id>`.
pub fn counter_path_for(task_path: &DbPath) -> DbPath {
    task_path.parent().parent().child(NUM_TASKS)
}

#[derive(Debug, Clone)]
pub struct BoardResolver {
    default: BoardRef,
    named: HashMap<String, BoardRef>,
}

impl BoardResolver {
    pub fn new(config: &BoardsConfig) -> Result<Self, ModelError> {
        let default = BoardRef::new(&config.default)?;
        let mut named = HashMap::new();
        for (name, partition) in config.named.iter() {
            named.insert(name.to_lowercase(), BoardRef::new(partition)?);
        }
        Ok(Self { default, named })
    }

    /// Case-insensitive lookup; unknown names map to the default board.
    pub fn resolve(&self, name: Option<&str>) -> Result<BoardRef, ModelError> {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ModelError::MissingParameter("board")),
        };
        Ok(self
            .named
            .get(&name.to_lowercase())
            .unwrap_or(&self.default)
            .clone())
    }

    /// Every configured partition, without duplicates.
    pub fn boards(&self) -> Vec<BoardRef> {
        let mut boards = vec![self.default.clone()];
        for board in self.named.values() {
            if !boards.contains(board) {
                boards.push(board.clone());
            }
        }
        boards
    }
}
