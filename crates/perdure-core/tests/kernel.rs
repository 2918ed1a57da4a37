//! End-to-end kernel scenarios: a full system driven with a virtual clock
//! over the in-memory subsystems, plus a SQLite parity check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use perdure_core::aio::queue::{InMemoryTransport, QueueProcessor};
use perdure_core::aio::store::{InMemoryStore, SqliteStore, StoreProcessor};
use perdure_core::aio::Aio;
use perdure_core::api::{
    Api, ApiHandle, ClaimTaskRequest, CompleteTaskRequest, HeartbeatTaskRequest, Request,
    RequestKind, RequestPayload, Response,
};
use perdure_core::handlers;
use perdure_core::metrics::KernelMetrics;
use perdure_core::status::{PlatformError, Status};
use perdure_core::system::{Config, System};
use perdure_core::task::{Task, TaskRecord, TaskState};
use serde_json::json;

/// Periodic passes are registered with this period so they run exactly once,
/// at tick zero.
const ONE_SHOT_PERIOD: u64 = 1_000_000;

fn config() -> Config {
    Config {
        task_enqueue_delay: Duration::from_millis(2_000),
        tick_budget: Duration::ZERO,
        ..Config::default()
    }
}

struct Harness {
    system: System,
    handle: ApiHandle,
    store: InMemoryStore,
    transport: InMemoryTransport,
}

enum Sweep {
    None,
    Enqueue,
    Timeout,
}

impl Harness {
    fn new(sweep: Sweep) -> Self {
        Self::over(InMemoryStore::new(), InMemoryTransport::new(), sweep)
    }

    fn over(store: InMemoryStore, transport: InMemoryTransport, sweep: Sweep) -> Self {
        let config = config();
        let (api, handle) = Api::new(config.api_queue_size);

        let mut aio = Aio::new();
        aio.register(StoreProcessor::new(store.clone()), config.aio_queue_size);
        aio.register(QueueProcessor::new(transport.clone()), config.aio_queue_size);

        let mut system = System::new(config, api, Box::new(aio), KernelMetrics::unregistered());
        system.add_on_request(RequestKind::ClaimTask, Box::new(handlers::claim_task));
        system.add_on_request(RequestKind::CompleteTask, Box::new(handlers::complete_task));
        system.add_on_request(RequestKind::HeartbeatTask, Box::new(handlers::heartbeat_task));
        match sweep {
            Sweep::None => {}
            Sweep::Enqueue => {
                system.add_on_tick(ONE_SHOT_PERIOD, Box::new(handlers::enqueue_tasks));
            }
            Sweep::Timeout => {
                system.add_on_tick(ONE_SHOT_PERIOD, Box::new(handlers::timeout_tasks));
            }
        }

        Self {
            system,
            handle,
            store,
            transport,
        }
    }

    /// Submits a request and ticks at fixed time `t` until it resolves.
    fn roundtrip(&mut self, t: i64, request: Request) -> Result<Response, PlatformError> {
        let slot: Arc<Mutex<Option<Result<Response, PlatformError>>>> = Arc::default();
        let sink = Arc::clone(&slot);
        self.handle
            .submit(request, Box::new(move |result| {
                *sink.lock().unwrap() = Some(result);
            }));

        for _ in 0..100_000 {
            self.system.tick(t);
            if let Some(result) = slot.lock().unwrap().take() {
                return result;
            }
        }
        panic!("request did not resolve");
    }

    /// Ticks at fixed time `t` until the scheduler drains (one sweep pass).
    fn run_sweep(&mut self, t: i64) {
        for _ in 0..100_000 {
            self.system.tick(t);
            if self.system.scheduler_done() {
                return;
            }
        }
        panic!("sweep did not converge");
    }
}

fn task(id: &str, state: TaskState, counter: u64, timeout: i64) -> Task {
    Task {
        id: id.to_string(),
        process_id: None,
        state,
        message: json!({"queue": "default"}),
        timeout,
        counter,
        attempt: 0,
        frequency: 0,
        expiration: 0,
        created_on: 0,
        completed_on: None,
    }
}

fn complete(id: &str, counter: u64) -> Request {
    Request {
        tags: Default::default(),
        payload: RequestPayload::CompleteTask(CompleteTaskRequest {
            id: id.to_string(),
            counter,
        }),
    }
}

fn claim(id: &str, counter: u64, process_id: &str, frequency: i64) -> Request {
    Request {
        tags: Default::default(),
        payload: RequestPayload::ClaimTask(ClaimTaskRequest {
            id: id.to_string(),
            counter,
            process_id: process_id.to_string(),
            frequency,
        }),
    }
}

fn heartbeat(id: &str, counter: u64) -> Request {
    Request {
        tags: Default::default(),
        payload: RequestPayload::HeartbeatTask(HeartbeatTaskRequest {
            id: id.to_string(),
            counter,
        }),
    }
}

#[test]
fn complete_commits_and_reports_the_tick_time() {
    let mut harness = Harness::new(Sweep::None);
    harness
        .store
        .insert_task(&task("t1", TaskState::Claimed, 7, 10_000));

    let response = harness.roundtrip(1_000, complete("t1", 7)).unwrap();
    let payload = response.task_response();
    assert_eq!(payload.status, Status::Created);

    let completed = payload.task.as_ref().unwrap();
    assert_eq!(completed.state, TaskState::Completed);
    assert_eq!(completed.counter, 7);
    assert_eq!(completed.completed_on, Some(1_000));
    assert_eq!(completed.message, json!({"queue": "default"}));

    let row = harness.store.get("t1").unwrap();
    assert_eq!(row.state, "completed");
    assert_eq!(row.completed_on, Some(1_000));
    assert_eq!(row.process_id, None);
}

#[test]
fn repeated_complete_is_idempotent() {
    let mut harness = Harness::new(Sweep::None);
    harness
        .store
        .insert_task(&task("t1", TaskState::Claimed, 7, 10_000));

    let first = harness.roundtrip(1_000, complete("t1", 7)).unwrap();
    assert_eq!(first.task_response().status, Status::Created);

    let second = harness.roundtrip(2_000, complete("t1", 7)).unwrap();
    assert_eq!(second.task_response().status, Status::TaskAlreadyCompleted);
    let reported = second.task_response().task.as_ref().unwrap();
    assert_eq!(reported.completed_on, Some(1_000));

    // The store row is untouched by the second attempt.
    let row = harness.store.get("t1").unwrap();
    assert_eq!(row.completed_on, Some(1_000));
}

#[test]
fn stale_counter_is_rejected_without_update() {
    let mut harness = Harness::new(Sweep::None);
    harness
        .store
        .insert_task(&task("t1", TaskState::Claimed, 7, 10_000));

    let response = harness.roundtrip(1_000, complete("t1", 8)).unwrap();
    assert_eq!(response.task_response().status, Status::TaskInvalidCounter);

    let row = harness.store.get("t1").unwrap();
    assert_eq!(row.state, "claimed");
    assert_eq!(row.counter, 7);
}

#[test]
fn missing_task_reports_not_found() {
    let mut harness = Harness::new(Sweep::None);

    let response = harness.roundtrip(1_000, complete("missing", 1)).unwrap();
    assert_eq!(response.task_response().status, Status::TaskNotFound);
    assert!(response.task_response().task.is_none());
}

#[test]
fn unclaimed_task_cannot_be_completed() {
    let mut harness = Harness::new(Sweep::None);
    harness
        .store
        .insert_task(&task("t2", TaskState::Enqueued, 3, 10_000));

    let response = harness.roundtrip(1_000, complete("t2", 3)).unwrap();
    assert_eq!(response.task_response().status, Status::TaskInvalidState);
}

#[test]
fn enqueue_pass_partitions_dead_and_live_tasks() {
    let mut harness = Harness::new(Sweep::Enqueue);
    harness.store.insert_task(&task("t3", TaskState::Init, 0, 500));
    harness
        .store
        .insert_task(&task("t4", TaskState::Init, 0, 5_000));

    harness.run_sweep(1_000);

    // t3's deadline passed before the pass: timed out, never delivered.
    let t3 = harness.store.get("t3").unwrap();
    assert_eq!(t3.state, "timedout");
    assert_eq!(t3.completed_on, Some(500));
    assert_eq!(t3.counter, 0);

    // t4 was delivered and enqueued with the configured claim window.
    let t4 = harness.store.get("t4").unwrap();
    assert_eq!(t4.state, "enqueued");
    assert_eq!(t4.expiration, 3_000);
    assert_eq!(t4.counter, 0);

    let delivered = harness.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, "t4");
}

#[test]
fn enqueue_pass_is_idempotent_on_an_unchanged_store() {
    let store = InMemoryStore::new();
    let transport = InMemoryTransport::new();
    store.insert_task(&task("t4", TaskState::Init, 0, 5_000));

    let mut first = Harness::over(store.clone(), transport.clone(), Sweep::Enqueue);
    first.run_sweep(1_000);

    let mut second = Harness::over(store.clone(), transport.clone(), Sweep::Enqueue);
    second.run_sweep(1_000);

    // The second pass found nothing in Init: one delivery, one transition.
    assert_eq!(transport.delivered().len(), 1);
    assert_eq!(store.get("t4").unwrap().state, "enqueued");
}

#[test]
fn enqueue_failure_stays_init_and_counts_the_attempt() {
    let mut harness = Harness::new(Sweep::Enqueue);
    harness
        .store
        .insert_task(&task("t5", TaskState::Init, 0, 5_000));
    harness.transport.set_failing(true);

    harness.run_sweep(1_000);

    let row = harness.store.get("t5").unwrap();
    assert_eq!(row.state, "init");
    assert_eq!(row.attempt, 1);
    assert_eq!(row.expiration, 3_000);
    assert_eq!(row.counter, 0);
    assert!(harness.transport.delivered().is_empty());
}

#[test]
fn enqueue_pass_skips_corrupt_records() {
    let mut harness = Harness::new(Sweep::Enqueue);
    harness.store.insert(TaskRecord {
        id: "bad".to_string(),
        process_id: None,
        state: "init".to_string(),
        message: "{not json".to_string(),
        timeout: 5_000,
        counter: 0,
        attempt: 0,
        frequency: 0,
        expiration: 0,
        created_on: 0,
        completed_on: None,
    });
    harness
        .store
        .insert_task(&task("good", TaskState::Init, 0, 5_000));

    harness.run_sweep(1_000);

    // The corrupt row is skipped, the healthy one still progresses.
    assert_eq!(harness.store.get("bad").unwrap().state, "init");
    assert_eq!(harness.store.get("good").unwrap().state, "enqueued");
}

#[test]
fn timeout_pass_times_out_and_re_arms() {
    let mut harness = Harness::new(Sweep::Timeout);

    // Claimed but the holder stopped heartbeating: back to Init, fenced.
    let mut stale = task("t1", TaskState::Claimed, 3, 60_000);
    stale.process_id = Some("w1".to_string());
    stale.expiration = 800;
    harness.store.insert_task(&stale);

    // Past its overall deadline: timed out.
    let mut dead = task("t2", TaskState::Enqueued, 1, 900);
    dead.expiration = 5_000;
    harness.store.insert_task(&dead);

    harness.run_sweep(1_000);

    let rearmed = harness.store.get("t1").unwrap();
    assert_eq!(rearmed.state, "init");
    assert_eq!(rearmed.counter, 4);
    assert_eq!(rearmed.process_id, None);
    assert_eq!(rearmed.completed_on, None);

    let timedout = harness.store.get("t2").unwrap();
    assert_eq!(timedout.state, "timedout");
    assert_eq!(timedout.completed_on, Some(900));
    assert_eq!(timedout.counter, 1);
}

#[test]
fn claim_heartbeat_complete_lifecycle_keeps_the_counter_monotonic() {
    let store = InMemoryStore::new();
    let transport = InMemoryTransport::new();
    store.insert_task(&task("t1", TaskState::Init, 0, 600_000));

    // Enqueue pass hands the task to the transport.
    let mut sweep = Harness::over(store.clone(), transport.clone(), Sweep::Enqueue);
    sweep.run_sweep(1_000);
    assert_eq!(store.get("t1").unwrap().state, "enqueued");

    let mut harness = Harness::over(store.clone(), transport, Sweep::None);

    // Claim bumps the counter and installs the holder.
    let claimed = harness
        .roundtrip(2_000, claim("t1", 0, "worker-9", 5_000))
        .unwrap();
    assert_eq!(claimed.task_response().status, Status::Created);
    let claimed_task = claimed.task_response().task.as_ref().unwrap();
    assert_eq!(claimed_task.counter, 1);
    assert_eq!(claimed_task.process_id.as_deref(), Some("worker-9"));
    assert_eq!(claimed_task.expiration, 7_000);

    // A second claim loses: the task is already claimed.
    let second = harness
        .roundtrip(2_500, claim("t1", 0, "worker-13", 5_000))
        .unwrap();
    assert_eq!(second.task_response().status, Status::TaskAlreadyClaimed);

    // Heartbeat refreshes the expiration without touching the counter.
    let beat = harness.roundtrip(4_000, heartbeat("t1", 1)).unwrap();
    assert_eq!(beat.task_response().status, Status::Ok);
    let beat_task = beat.task_response().task.as_ref().unwrap();
    assert_eq!(beat_task.counter, 1);
    assert_eq!(beat_task.expiration, 9_000);

    // Complete finishes the epoch it claimed.
    let done = harness.roundtrip(5_000, complete("t1", 1)).unwrap();
    assert_eq!(done.task_response().status, Status::Created);
    assert_eq!(
        done.task_response().task.as_ref().unwrap().completed_on,
        Some(5_000)
    );

    // Counter never decreased across the whole life: 0 -> 1 -> 1 -> 1.
    let row = store.get("t1").unwrap();
    assert_eq!(row.counter, 1);
    assert_eq!(row.state, "completed");
}

#[test]
fn claiming_an_unenqueued_task_is_invalid() {
    let mut harness = Harness::new(Sweep::None);
    harness
        .store
        .insert_task(&task("t1", TaskState::Init, 0, 10_000));

    let response = harness
        .roundtrip(1_000, claim("t1", 0, "worker-1", 1_000))
        .unwrap();
    assert_eq!(response.task_response().status, Status::TaskInvalidState);
}

#[test]
fn sqlite_store_reaches_the_same_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .insert(&TaskRecord::from(&task("t1", TaskState::Claimed, 7, 10_000)))
            .unwrap();
    }

    let config = config();
    let (api, handle) = Api::new(config.api_queue_size);
    let mut aio = Aio::new();
    aio.register(
        StoreProcessor::new(SqliteStore::open(&path).unwrap()),
        config.aio_queue_size,
    );
    aio.register(
        QueueProcessor::new(InMemoryTransport::new()),
        config.aio_queue_size,
    );
    let mut system = System::new(config, api, Box::new(aio), KernelMetrics::unregistered());
    system.add_on_request(RequestKind::CompleteTask, Box::new(handlers::complete_task));

    let slot: Arc<Mutex<Option<Result<Response, PlatformError>>>> = Arc::default();
    let sink = Arc::clone(&slot);
    handle.submit(
        complete("t1", 7),
        Box::new(move |result| *sink.lock().unwrap() = Some(result)),
    );
    let response = loop {
        system.tick(1_000);
        if let Some(result) = slot.lock().unwrap().take() {
            break result.unwrap();
        }
    };
    assert_eq!(response.task_response().status, Status::Created);
    assert_eq!(
        response.task_response().task.as_ref().unwrap().completed_on,
        Some(1_000)
    );

    // A second connection observes the durable transition.
    drop(system);
    let verify = SqliteStore::open(&path).unwrap();
    let mut backend = verify;
    use perdure_core::aio::{Command, ReadTaskCommand, Transaction};
    use perdure_core::aio::store::StoreBackend;
    let results = backend
        .execute(&Transaction {
            commands: vec![Command::ReadTask(ReadTaskCommand {
                id: "t1".to_string(),
            })],
        })
        .unwrap();
    let row = results
        .into_iter()
        .next()
        .unwrap()
        .into_read_task()
        .record
        .unwrap();
    assert_eq!(row.state, "completed");
    assert_eq!(row.completed_on, Some(1_000));
}
