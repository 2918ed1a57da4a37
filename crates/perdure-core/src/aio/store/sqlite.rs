//! `SQLite`-backed store.
//!
//! The durable default: a single-file database in WAL mode, with the schema
//! embedded at compile time. The store worker owns the write connection;
//! guarded updates compile down to a single `UPDATE ... WHERE id = ? AND
//! counter = ? AND state IN (...)`, so the guard and the mutation commit
//! atomically.

// SQLite stores counters as i64; they are always non-negative here.
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::super::types::{
    Command, CommandResult, ReadElapsedTasksCommand, ReadTaskCommand, ReadTaskResult,
    ReadTasksCommand, ReadTasksResult, Transaction, UpdateTaskCommand, UpdateTaskResult,
};
use super::{NON_TERMINAL_STATES, StoreBackend, StoreError};
use crate::task::TaskRecord;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const TASK_COLUMNS: &str =
    "id, process_id, state, message, timeout, counter, attempt, frequency, expiration, \
     created_on, completed_on";

/// A `SQLite` store backend.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the database cannot be opened or
    /// initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_connection(&conn)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;
        Ok(Self { conn })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StoreError> {
        // The schema includes its PRAGMA statements.
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Inserts a raw row, replacing any existing row with the same id.
    ///
    /// The seeding seam for tests and embedders; rows are normally created
    /// by the promise and schedule handlers.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails.
    pub fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO tasks (id, process_id, state, message, timeout, counter, \
             attempt, frequency, expiration, created_on, completed_on) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.process_id,
                record.state,
                record.message,
                record.timeout,
                record.counter as i64,
                record.attempt as i64,
                record.frequency,
                record.expiration,
                record.created_on,
                record.completed_on,
            ],
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
        Ok(TaskRecord {
            id: row.get(0)?,
            process_id: row.get(1)?,
            state: row.get(2)?,
            message: row.get(3)?,
            timeout: row.get(4)?,
            counter: row.get::<_, i64>(5)? as u64,
            attempt: row.get::<_, i64>(6)? as u64,
            frequency: row.get(7)?,
            expiration: row.get(8)?,
            created_on: row.get(9)?,
            completed_on: row.get(10)?,
        })
    }

    fn read_task(
        tx: &rusqlite::Transaction<'_>,
        cmd: &ReadTaskCommand,
    ) -> Result<ReadTaskResult, StoreError> {
        let record = tx
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![cmd.id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(ReadTaskResult {
            rows_returned: usize::from(record.is_some()),
            record,
        })
    }

    fn read_tasks(
        tx: &rusqlite::Transaction<'_>,
        cmd: &ReadTasksCommand,
    ) -> Result<ReadTasksResult, StoreError> {
        let placeholders = vec!["?"; cmd.states.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE expiration <= ? AND state IN ({placeholders}) ORDER BY id LIMIT ?"
        );

        let mut values: Vec<Value> = Vec::with_capacity(cmd.states.len() + 2);
        values.push(Value::Integer(cmd.time));
        for state in &cmd.states {
            values.push(Value::Text(state.as_str().to_string()));
        }
        values.push(Value::Integer(cmd.limit as i64));

        let mut stmt = tx.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ReadTasksResult {
            rows_returned: records.len(),
            records,
        })
    }

    fn read_elapsed_tasks(
        tx: &rusqlite::Transaction<'_>,
        cmd: &ReadElapsedTasksCommand,
    ) -> Result<ReadTasksResult, StoreError> {
        let placeholders = vec!["?"; NON_TERMINAL_STATES.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE state IN ({placeholders}) AND (expiration <= ? OR timeout <= ?) \
             ORDER BY id LIMIT ?"
        );

        let mut values: Vec<Value> = Vec::with_capacity(NON_TERMINAL_STATES.len() + 3);
        for state in NON_TERMINAL_STATES {
            values.push(Value::Text(state.to_string()));
        }
        values.push(Value::Integer(cmd.time));
        values.push(Value::Integer(cmd.time));
        values.push(Value::Integer(cmd.limit as i64));

        let mut stmt = tx.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ReadTasksResult {
            rows_returned: records.len(),
            records,
        })
    }

    fn update_task(
        tx: &rusqlite::Transaction<'_>,
        cmd: &UpdateTaskCommand,
    ) -> Result<UpdateTaskResult, StoreError> {
        let placeholders = vec!["?"; cmd.current_states.len()].join(", ");
        let sql = format!(
            "UPDATE tasks SET process_id = ?, state = ?, counter = ?, attempt = ?, \
             frequency = ?, expiration = ?, completed_on = ? \
             WHERE id = ? AND counter = ? AND state IN ({placeholders})"
        );

        let mut values: Vec<Value> = Vec::with_capacity(cmd.current_states.len() + 9);
        values.push(match &cmd.process_id {
            Some(process_id) => Value::Text(process_id.clone()),
            None => Value::Null,
        });
        values.push(Value::Text(cmd.state.as_str().to_string()));
        values.push(Value::Integer(cmd.counter as i64));
        values.push(Value::Integer(cmd.attempt as i64));
        values.push(Value::Integer(cmd.frequency));
        values.push(Value::Integer(cmd.expiration));
        values.push(match cmd.completed_on {
            Some(completed_on) => Value::Integer(completed_on),
            None => Value::Null,
        });
        values.push(Value::Text(cmd.id.clone()));
        values.push(Value::Integer(cmd.current_counter as i64));
        for state in &cmd.current_states {
            values.push(Value::Text(state.as_str().to_string()));
        }

        let rows_affected = tx.execute(&sql, params_from_iter(values))?;
        Ok(UpdateTaskResult { rows_affected })
    }
}

impl StoreBackend for SqliteStore {
    fn execute(&mut self, transaction: &Transaction) -> Result<Vec<CommandResult>, StoreError> {
        let tx = self.conn.transaction()?;
        let mut results = Vec::with_capacity(transaction.commands.len());
        for command in &transaction.commands {
            results.push(match command {
                Command::ReadTask(cmd) => CommandResult::ReadTask(Self::read_task(&tx, cmd)?),
                Command::ReadTasks(cmd) => CommandResult::ReadTasks(Self::read_tasks(&tx, cmd)?),
                Command::ReadElapsedTasks(cmd) => {
                    CommandResult::ReadTasks(Self::read_elapsed_tasks(&tx, cmd)?)
                }
                Command::UpdateTask(cmd) => {
                    CommandResult::UpdateTask(Self::update_task(&tx, cmd)?)
                }
            });
        }
        tx.commit()?;
        Ok(results)
    }
}
