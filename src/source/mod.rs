//! Query execution against the relational source.
//!
//! The projector only sees the [`QueryExecutor`] trait: acquire a statement
//! handle, execute through it, release it. Handles are pooled and move
//! through an explicit state machine, so a different backend (or a
//! concurrency-safe pool) can replace [`SqliteExecutor`] without touching
//! the engine.

pub mod row;
pub mod sqlite;

pub use row::{ColumnMeta, ColumnType, Row, RowSet, SqlValue};
pub use sqlite::SqliteExecutor;

use thiserror::Error;

/// Pool or driver failure while acquiring, executing, or releasing.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown statement handle {0}")]
    UnknownHandle(usize),

    #[error("statement handle {0} is not busy")]
    NotBusy(usize),

    #[error("statement handle {0} is not bound to a parameterized query")]
    NotPrepared(usize),

    #[error("statement handle {0} is bound to a parameterized query")]
    AlreadyPrepared(usize),
}

/// Opaque ticket for one pooled statement slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub(crate) usize);

impl StatementHandle {
    /// Slot index, for diagnostics.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Lifecycle of a pooled statement slot.
///
/// Plain slots start `Unused`, prepared slots start `Preset`; acquisition
/// moves a slot to `Busy`, release to `Recyclable`, from where it can be
/// handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Unused,
    Preset,
    Busy,
    Recyclable,
}

/// Executes queries through pooled statement handles.
///
/// Callers must release every acquired handle on every exit path, success or
/// failure; a handle left `Busy` is leaked for the lifetime of the pool.
/// Releasing an unknown or idle handle is an error.
pub trait QueryExecutor {
    /// Acquire a handle for one-off query text.
    fn acquire(&mut self) -> Result<StatementHandle, SourceError>;

    /// Acquire a handle bound to a parameterized query with exactly one
    /// placeholder. An idle handle already bound to the identical query
    /// string is reused; otherwise a new slot is allocated.
    fn acquire_prepared(&mut self, query: &str) -> Result<StatementHandle, SourceError>;

    /// Run `query` on a plain handle and materialize the full result.
    fn execute(&mut self, handle: StatementHandle, query: &str) -> Result<RowSet, SourceError>;

    /// Run the bound query of a prepared handle with `key` as its single
    /// parameter and materialize the full result.
    fn execute_prepared(&mut self, handle: StatementHandle, key: i64)
        -> Result<RowSet, SourceError>;

    /// Return a busy handle to the pool.
    fn release(&mut self, handle: StatementHandle) -> Result<(), SourceError>;
}
