use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no {0} in request")]
    MissingParameter(&'static str),
    #[error("malformed item: {0}")]
    MalformedItem(String),
    #[error("invalid task id '{0}'")]
    InvalidId(String),
    #[error("invalid board partition '{0}'")]
    InvalidBoard(String),
}
