//! Prometheus metrics for kernel health observability.
//!
//! The kernel records three things: how many coroutines are alive, how API
//! requests resolve, and how much I/O flows through the AIO plane. The
//! registry is owned by the embedding process (the daemon exposes it at
//! `/metrics`); the kernel only holds the metric handles.
//!
//! # Thread Safety
//!
//! All metrics use interior mutability and are safe to share across threads.
//! The struct is `Clone`, `Send`, and `Sync`.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use thiserror::Error;

/// Errors that can occur during metrics registration.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),
}

/// Kernel health metrics.
#[derive(Clone)]
pub struct KernelMetrics {
    /// Number of live coroutines in the scheduler.
    coroutines_active: IntGauge,

    /// Total API requests resolved, labeled by `kind` and `outcome`.
    api_requests_total: IntCounterVec,

    /// Total submissions handed to the AIO plane.
    aio_submissions_total: IntCounter,

    /// Total completions drained from the AIO plane, labeled by `outcome`.
    aio_completions_total: IntCounterVec,
}

impl KernelMetrics {
    /// Creates the kernel metrics and registers them with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate
    /// name).
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let coroutines_active = IntGauge::with_opts(Opts::new(
            "perdure_kernel_coroutines_active",
            "Number of live coroutines in the scheduler",
        ))?;
        let api_requests_total = IntCounterVec::new(
            Opts::new(
                "perdure_kernel_api_requests_total",
                "API requests resolved, by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let aio_submissions_total = IntCounter::with_opts(Opts::new(
            "perdure_kernel_aio_submissions_total",
            "Submissions handed to the AIO plane",
        ))?;
        let aio_completions_total = IntCounterVec::new(
            Opts::new(
                "perdure_kernel_aio_completions_total",
                "Completions drained from the AIO plane, by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(coroutines_active.clone()))?;
        registry.register(Box::new(api_requests_total.clone()))?;
        registry.register(Box::new(aio_submissions_total.clone()))?;
        registry.register(Box::new(aio_completions_total.clone()))?;

        Ok(Self {
            coroutines_active,
            api_requests_total,
            aio_submissions_total,
            aio_completions_total,
        })
    }

    /// Creates metrics registered against a throwaway registry.
    ///
    /// For tests and embedders that do not scrape.
    #[must_use]
    pub fn unregistered() -> Self {
        Self::new(&Registry::new()).expect("fresh registry cannot have duplicate metrics")
    }

    /// Records a coroutine entering the scheduler.
    pub fn coroutine_added(&self) {
        self.coroutines_active.inc();
    }

    /// Records a coroutine leaving the scheduler.
    pub fn coroutine_finished(&self) {
        self.coroutines_active.dec();
    }

    /// Returns the number of live coroutines.
    #[must_use]
    pub fn coroutines_active(&self) -> i64 {
        self.coroutines_active.get()
    }

    /// Records an API request resolving with the given outcome.
    pub fn api_request_completed(&self, kind: &str, outcome: &str) {
        self.api_requests_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Records submissions handed to the AIO plane.
    pub fn aio_submitted(&self, count: usize) {
        self.aio_submissions_total.inc_by(count as u64);
    }

    /// Records a completion drained from the AIO plane.
    pub fn aio_completed(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.aio_completions_total
            .with_label_values(&[outcome])
            .inc();
    }
}
