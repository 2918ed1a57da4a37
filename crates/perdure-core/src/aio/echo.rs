//! Loopback subsystem: completes every submission with its own payload.
//!
//! Exists to exercise the plane, the scheduler, and coroutine fan-out
//! without a store or transport behind them.

use super::plane::Processor;
use super::types::{Completion, EchoCompletion, Submission, SubmissionKind, SubmissionPayload};
use crate::status::PlatformError;

/// The echo subsystem processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

impl EchoProcessor {
    /// Creates an echo processor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Processor for EchoProcessor {
    fn kind(&self) -> SubmissionKind {
        SubmissionKind::Echo
    }

    fn process(&mut self, submission: Submission) -> Result<Completion, PlatformError> {
        let kind = submission.kind();
        let SubmissionPayload::Echo(echo) = submission.payload else {
            panic!("echo subsystem routed a {kind} submission")
        };
        Ok(Completion::Echo(EchoCompletion { data: echo.data }))
    }
}
