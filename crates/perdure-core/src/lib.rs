//! # perdure-core
//!
//! A durable-execution kernel: a single-process engine that drives
//! long-lived tasks through a guarded state machine backed by a
//! transactional store.
//!
//! Requests enter through the [`api`] ingress; the [`system`] loop spawns a
//! handler [`coroutine`](coroutine) per request and periodic sweeps on a
//! tick cadence; the [`scheduler`] resumes coroutines as their typed I/O
//! [submissions](aio) complete. The kernel responds only after the requested
//! transition has been durably committed, and it advances tasks on its own
//! (enqueueing them to workers, timing them out, completing them).
//!
//! ## Design
//!
//! - **Coroutines as the execution primitive**: every handler is an `async`
//!   block yielding typed submissions, so transactional I/O reads as
//!   straight-line control flow and an optimistic-concurrency retry is a
//!   plain loop.
//! - **One thread for the kernel**: the loop, scheduler, and handlers share
//!   a single logical thread; parallelism is confined to the AIO subsystem
//!   workers.
//! - **Guards over locks**: the store is the only shared mutable resource,
//!   serialized per row by `(current_states, current_counter)` guards.
//!   Terminal states absorb; counters never decrease.
//!
//! ## Example
//!
//! ```rust,no_run
//! use perdure_core::aio::store::{InMemoryStore, StoreProcessor};
//! use perdure_core::aio::queue::{InMemoryTransport, QueueProcessor};
//! use perdure_core::aio::Aio;
//! use perdure_core::api::{Api, RequestKind};
//! use perdure_core::handlers;
//! use perdure_core::metrics::KernelMetrics;
//! use perdure_core::system::{Config, System, SystemClock};
//!
//! let config = Config::default();
//! let (api, handle) = Api::new(config.api_queue_size);
//!
//! let mut aio = Aio::new();
//! aio.register(StoreProcessor::new(InMemoryStore::new()), config.aio_queue_size);
//! aio.register(QueueProcessor::new(InMemoryTransport::new()), config.aio_queue_size);
//!
//! let mut system = System::new(config, api, Box::new(aio), KernelMetrics::unregistered());
//! system.add_on_request(RequestKind::ClaimTask, Box::new(handlers::claim_task));
//! system.add_on_request(RequestKind::CompleteTask, Box::new(handlers::complete_task));
//! system.add_on_request(RequestKind::HeartbeatTask, Box::new(handlers::heartbeat_task));
//! system.add_on_tick(1, Box::new(|config| handlers::enqueue_tasks(config)));
//! system.add_on_tick(1, Box::new(|config| handlers::timeout_tasks(config)));
//!
//! // `handle` goes to the front-end; the loop runs until shutdown drains.
//! # drop(handle);
//! system.run(&SystemClock);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aio;
pub mod api;
pub mod coroutine;
pub mod handlers;
pub mod metrics;
pub mod scheduler;
pub mod status;
pub mod system;
pub mod task;

pub use api::{Request, Response};
pub use status::{ErrorCode, PlatformError, Status};
pub use system::{Config, System};
pub use task::{Task, TaskState};
