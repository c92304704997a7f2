//! SQLite-backed query executor.
//!
//! Owns one [`rusqlite::Connection`] plus a slot table implementing the
//! handle state machine. Statement compilation reuse is delegated to the
//! driver's prepared-statement cache; the slots track acquisition state and
//! the query string a prepared handle is bound to.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::debug;

use super::row::{ColumnMeta, ColumnType, Row, RowSet, SqlValue};
use super::{HandleState, QueryExecutor, SourceError, StatementHandle};

/// Plain slots prewarmed at construction.
const INITIAL_PLAIN_SLOTS: usize = 5;

/// Capacity of the driver's prepared-statement cache.
const STATEMENT_CACHE_CAPACITY: usize = 32;

#[derive(Debug)]
struct Slot {
    /// Bound query for prepared slots, `None` for plain ones.
    query: Option<String>,
    state: HandleState,
}

/// [`QueryExecutor`] over a SQLite database.
#[derive(Debug)]
pub struct SqliteExecutor {
    conn: Connection,
    slots: Vec<Slot>,
}

impl SqliteExecutor {
    /// Open a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self, SourceError> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        let slots = (0..INITIAL_PLAIN_SLOTS)
            .map(|_| Slot {
                query: None,
                state: HandleState::Unused,
            })
            .collect();
        SqliteExecutor { conn, slots }
    }

    /// The underlying connection, e.g. for seeding test fixtures.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Current number of slots, prewarmed and allocated.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// State of a handle, if it designates a known slot.
    pub fn handle_state(&self, handle: StatementHandle) -> Option<HandleState> {
        self.slots.get(handle.0).map(|slot| slot.state)
    }

    fn slot_mut(&mut self, handle: StatementHandle) -> Result<&mut Slot, SourceError> {
        self.slots
            .get_mut(handle.0)
            .ok_or(SourceError::UnknownHandle(handle.0))
    }

    fn fetch(conn: &Connection, query: &str, key: Option<i64>) -> Result<RowSet, SourceError> {
        let mut stmt = conn.prepare_cached(query)?;
        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|col| ColumnMeta {
                name: col.name().to_string(),
                ty: ColumnType::from_decl(col.decl_type()),
            })
            .collect();

        let mut fetched = match key {
            Some(key) => stmt.query(params![key])?,
            None => stmt.query(params![])?,
        };

        let mut rows = Vec::new();
        while let Some(row) = fetched.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                values.push(match row.get_ref(index)? {
                    ValueRef::Null => None,
                    ValueRef::Integer(v) => Some(SqlValue::Integer(v)),
                    ValueRef::Real(v) => Some(SqlValue::Real(v)),
                    ValueRef::Text(v) => Some(SqlValue::Text(String::from_utf8_lossy(v).into_owned())),
                    ValueRef::Blob(v) => Some(SqlValue::Blob(v.to_vec())),
                });
            }
            rows.push(Row { values });
        }
        Ok(RowSet { columns, rows })
    }
}

impl QueryExecutor for SqliteExecutor {
    fn acquire(&mut self) -> Result<StatementHandle, SourceError> {
        let reusable = self.slots.iter().position(|slot| {
            slot.query.is_none()
                && matches!(slot.state, HandleState::Unused | HandleState::Recyclable)
        });
        let index = match reusable {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    query: None,
                    state: HandleState::Unused,
                });
                debug!(slot = self.slots.len() - 1, "allocated plain statement slot");
                self.slots.len() - 1
            }
        };
        self.slots[index].state = HandleState::Busy;
        Ok(StatementHandle(index))
    }

    fn acquire_prepared(&mut self, query: &str) -> Result<StatementHandle, SourceError> {
        let reusable = self.slots.iter().position(|slot| {
            matches!(slot.state, HandleState::Preset | HandleState::Recyclable)
                && slot.query.as_deref() == Some(query)
        });
        let index = match reusable {
            Some(index) => index,
            None => {
                // Compile now so a bad query fails at acquisition, and the
                // driver cache holds the statement for later executions.
                self.conn.prepare_cached(query)?;
                self.slots.push(Slot {
                    query: Some(query.to_string()),
                    state: HandleState::Preset,
                });
                debug!(slot = self.slots.len() - 1, "allocated prepared statement slot");
                self.slots.len() - 1
            }
        };
        self.slots[index].state = HandleState::Busy;
        Ok(StatementHandle(index))
    }

    fn execute(&mut self, handle: StatementHandle, query: &str) -> Result<RowSet, SourceError> {
        let slot = self.slot_mut(handle)?;
        if slot.query.is_some() {
            return Err(SourceError::AlreadyPrepared(handle.0));
        }
        if slot.state != HandleState::Busy {
            return Err(SourceError::NotBusy(handle.0));
        }
        Self::fetch(&self.conn, query, None)
    }

    fn execute_prepared(
        &mut self,
        handle: StatementHandle,
        key: i64,
    ) -> Result<RowSet, SourceError> {
        let slot = self.slot_mut(handle)?;
        if slot.state != HandleState::Busy {
            return Err(SourceError::NotBusy(handle.0));
        }
        let Some(query) = slot.query.clone() else {
            return Err(SourceError::NotPrepared(handle.0));
        };
        Self::fetch(&self.conn, &query, Some(key))
    }

    fn release(&mut self, handle: StatementHandle) -> Result<(), SourceError> {
        let slot = self.slot_mut(handle)?;
        if slot.state != HandleState::Busy {
            return Err(SourceError::NotBusy(handle.0));
        }
        slot.state = HandleState::Recyclable;
        Ok(())
    }
}
