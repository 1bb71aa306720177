//! Failures reading or writing run history and notification marks.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A state failure. Each variant carries the underlying redb or serde
/// message.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open state table: {0}")]
    Table(String),

    #[error("cannot read state: {0}")]
    Read(String),

    #[error("cannot write state: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    /// A stored run or notification mark is not valid JSON for its type.
    #[error("corrupt record in state database: {0}")]
    Deserialize(String),
}
