//! In-memory store backend.
//!
//! The default backend for tests and for running the kernel without a
//! database. Rows live in a `BTreeMap` so batch reads iterate in id order,
//! which keeps every test deterministic. The map is behind an
//! `Arc<Mutex<_>>` so a cloned handle can seed rows and inspect state from
//! the test thread while the backend itself runs on the store worker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::super::types::{
    Command, CommandResult, ReadElapsedTasksCommand, ReadTaskCommand, ReadTaskResult,
    ReadTasksCommand, ReadTasksResult, Transaction, UpdateTaskCommand, UpdateTaskResult,
};
use super::{NON_TERMINAL_STATES, StoreBackend, StoreError, guard_matches};
use crate::task::{Task, TaskRecord};

/// In-memory task rows keyed by id.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<BTreeMap<String, TaskRecord>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a raw row, replacing any existing row with the same id.
    ///
    /// Rows are normally created by the promise and schedule handlers; this
    /// is the seeding seam for tests and embedders, and deliberately accepts
    /// arbitrary (including corrupt) stored representations.
    pub fn insert(&self, record: TaskRecord) {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .insert(record.id.clone(), record);
    }

    /// Inserts a task using its canonical stored representation.
    pub fn insert_task(&self, task: &Task) {
        self.insert(TaskRecord::from(task));
    }

    /// Returns the row for `id`, if present.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .get(id)
            .cloned()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("store mutex poisoned").len()
    }

    /// Returns `true` if the store has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_task(records: &BTreeMap<String, TaskRecord>, cmd: &ReadTaskCommand) -> ReadTaskResult {
        let record = records.get(&cmd.id).cloned();
        ReadTaskResult {
            rows_returned: usize::from(record.is_some()),
            record,
        }
    }

    fn read_tasks(
        records: &BTreeMap<String, TaskRecord>,
        cmd: &ReadTasksCommand,
    ) -> ReadTasksResult {
        let matched: Vec<TaskRecord> = records
            .values()
            .filter(|record| {
                record.expiration <= cmd.time
                    && cmd.states.iter().any(|state| state.as_str() == record.state)
            })
            .take(cmd.limit)
            .cloned()
            .collect();
        ReadTasksResult {
            rows_returned: matched.len(),
            records: matched,
        }
    }

    fn read_elapsed_tasks(
        records: &BTreeMap<String, TaskRecord>,
        cmd: &ReadElapsedTasksCommand,
    ) -> ReadTasksResult {
        let matched: Vec<TaskRecord> = records
            .values()
            .filter(|record| {
                NON_TERMINAL_STATES.contains(&record.state.as_str())
                    && (record.expiration <= cmd.time || record.timeout <= cmd.time)
            })
            .take(cmd.limit)
            .cloned()
            .collect();
        ReadTasksResult {
            rows_returned: matched.len(),
            records: matched,
        }
    }

    fn update_task(
        records: &mut BTreeMap<String, TaskRecord>,
        cmd: &UpdateTaskCommand,
    ) -> UpdateTaskResult {
        let Some(record) = records.get_mut(&cmd.id) else {
            return UpdateTaskResult { rows_affected: 0 };
        };
        if record.counter != cmd.current_counter || !guard_matches(&record.state, cmd) {
            return UpdateTaskResult { rows_affected: 0 };
        }

        record.process_id = cmd.process_id.clone();
        record.state = cmd.state.as_str().to_string();
        record.counter = cmd.counter;
        record.attempt = cmd.attempt;
        record.frequency = cmd.frequency;
        record.expiration = cmd.expiration;
        record.completed_on = cmd.completed_on;
        UpdateTaskResult { rows_affected: 1 }
    }
}

impl StoreBackend for InMemoryStore {
    fn execute(&mut self, transaction: &Transaction) -> Result<Vec<CommandResult>, StoreError> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        let results = transaction
            .commands
            .iter()
            .map(|command| match command {
                Command::ReadTask(cmd) => CommandResult::ReadTask(Self::read_task(&records, cmd)),
                Command::ReadTasks(cmd) => {
                    CommandResult::ReadTasks(Self::read_tasks(&records, cmd))
                }
                Command::ReadElapsedTasks(cmd) => {
                    CommandResult::ReadTasks(Self::read_elapsed_tasks(&records, cmd))
                }
                Command::UpdateTask(cmd) => {
                    CommandResult::UpdateTask(Self::update_task(&mut records, cmd))
                }
            })
            .collect();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::task::TaskState;

    fn task(id: &str, state: TaskState, counter: u64) -> Task {
        Task {
            id: id.to_string(),
            process_id: None,
            state,
            message: json!({}),
            timeout: 10_000,
            counter,
            attempt: 0,
            frequency: 0,
            expiration: 0,
            created_on: 0,
            completed_on: None,
        }
    }

    fn update(id: &str, current_counter: u64) -> UpdateTaskCommand {
        UpdateTaskCommand {
            id: id.to_string(),
            process_id: None,
            state: TaskState::Completed,
            counter: current_counter,
            attempt: 0,
            frequency: 0,
            expiration: 0,
            completed_on: Some(1_000),
            current_states: vec![TaskState::Claimed],
            current_counter,
        }
    }

    fn execute_one(store: &InMemoryStore, command: Command) -> CommandResult {
        let mut backend = store.clone();
        backend
            .execute(&Transaction {
                commands: vec![command],
            })
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn read_task_returns_zero_or_one_rows() {
        let store = InMemoryStore::new();
        store.insert_task(&task("t1", TaskState::Init, 0));

        let found = execute_one(
            &store,
            Command::ReadTask(ReadTaskCommand {
                id: "t1".to_string(),
            }),
        )
        .into_read_task();
        assert_eq!(found.rows_returned, 1);

        let missing = execute_one(
            &store,
            Command::ReadTask(ReadTaskCommand {
                id: "nope".to_string(),
            }),
        )
        .into_read_task();
        assert_eq!(missing.rows_returned, 0);
        assert!(missing.record.is_none());
    }

    #[test]
    fn guarded_update_commits_only_on_matching_snapshot() {
        let store = InMemoryStore::new();
        store.insert_task(&task("t1", TaskState::Claimed, 7));

        // Wrong counter: no rows.
        let missed = execute_one(&store, Command::UpdateTask(update("t1", 8))).into_update_task();
        assert_eq!(missed.rows_affected, 0);
        assert_eq!(store.get("t1").unwrap().state, "claimed");

        // Matching snapshot: one row.
        let hit = execute_one(&store, Command::UpdateTask(update("t1", 7))).into_update_task();
        assert_eq!(hit.rows_affected, 1);
        let row = store.get("t1").unwrap();
        assert_eq!(row.state, "completed");
        assert_eq!(row.completed_on, Some(1_000));

        // Terminal row: the same guard can never match again.
        let again = execute_one(&store, Command::UpdateTask(update("t1", 7))).into_update_task();
        assert_eq!(again.rows_affected, 0);
    }

    #[test]
    fn read_tasks_filters_state_and_due_time() {
        let store = InMemoryStore::new();
        // Fresh row: zero expiration, due immediately.
        store.insert_task(&task("t1", TaskState::Init, 0));
        // Backed off after a failed enqueue: not due yet.
        let mut backed_off = task("t2", TaskState::Init, 0);
        backed_off.expiration = 3_000;
        store.insert_task(&backed_off);
        // Wrong state.
        store.insert_task(&task("t3", TaskState::Claimed, 1));

        let result = execute_one(
            &store,
            Command::ReadTasks(ReadTasksCommand {
                states: vec![TaskState::Init],
                time: 1_000,
                limit: 10,
            }),
        )
        .into_read_tasks();

        assert_eq!(result.rows_returned, 1);
        assert_eq!(result.records[0].id, "t1");
    }

    #[test]
    fn read_elapsed_skips_terminal_rows() {
        let store = InMemoryStore::new();
        let mut idle = task("t1", TaskState::Enqueued, 1);
        idle.expiration = 900;
        store.insert_task(&idle);
        let mut done = task("t2", TaskState::Completed, 2);
        done.expiration = 900;
        store.insert_task(&done);
        let mut live = task("t3", TaskState::Claimed, 3);
        live.expiration = 5_000;
        store.insert_task(&live);

        let result = execute_one(
            &store,
            Command::ReadElapsedTasks(ReadElapsedTasksCommand {
                time: 1_000,
                limit: 10,
            }),
        )
        .into_read_tasks();

        assert_eq!(result.rows_returned, 1);
        assert_eq!(result.records[0].id, "t1");
    }

    #[test]
    fn results_follow_command_order() {
        let store = InMemoryStore::new();
        store.insert_task(&task("t1", TaskState::Claimed, 7));

        let mut backend = store.clone();
        let results = backend
            .execute(&Transaction {
                commands: vec![
                    Command::ReadTask(ReadTaskCommand {
                        id: "t1".to_string(),
                    }),
                    Command::UpdateTask(update("t1", 7)),
                    Command::ReadTask(ReadTaskCommand {
                        id: "t1".to_string(),
                    }),
                ],
            })
            .unwrap();

        assert_eq!(results.len(), 3);
        let after = results.into_iter().nth(2).unwrap().into_read_task();
        assert_eq!(after.record.unwrap().state, "completed");
    }
}
