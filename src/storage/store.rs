//! Narrow data-access capability shared by every store backend.
//!
//! A `Store` is one open connection with at most one open transaction. Writes are
//! not visible to other connections until `commit`; `rollback` discards everything
//! since the last commit. Callers own the lifecycle and must `close` explicitly.

use crate::storage::value::{Row, SqlValue};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("execute failed: {0}")]
    Execute(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("rollback failed: {0}")]
    Rollback(String),

    #[error("close failed: {0}")]
    Close(String),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    /// A table-level operation failed and was rolled back.
    #[error("error {action} table '{table}': {source}")]
    Table {
        action: &'static str,
        table: String,
        #[source]
        source: Box<StoreError>,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait Store: Send {
    /// Run a statement, binding `params` positionally to `?` placeholders.
    /// Returns the number of rows changed.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<usize>;

    /// Run a schema statement without taking the write lock up front. Joins
    /// the open transaction if there is one, otherwise runs in autocommit.
    fn execute_ddl(&mut self, sql: &str) -> StoreResult<()>;

    /// Run a statement and collect every result row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<Row>>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;

    /// Close the connection. Uncommitted work is discarded.
    fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Opens fresh `Store` connections against one configured location.
pub trait Connector: Send + Sync {
    fn connect(&self) -> StoreResult<Box<dyn Store>>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}
