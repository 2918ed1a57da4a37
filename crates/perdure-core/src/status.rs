//! Response status and platform error taxonomy.
//!
//! Two disjoint axes, per the error-handling design:
//!
//! - [`Status`] — expected domain outcomes (not-found, invalid state,
//!   already-completed). Produced by handlers, surfaced to clients with fixed
//!   HTTP/gRPC mappings, never logged as errors.
//! - [`ErrorCode`] / [`PlatformError`] — unexpected infrastructure failures
//!   (store I/O, serialization, queue-full, shutdown). Surfaced through the
//!   response callback as an error, never translated into a [`Status`] by the
//!   kernel; the front-end owns that translation.
//!
//! Both sets are closed. Discriminants are wire-stable: the HTTP status of a
//! code is always `code / 10`, so new variants MUST pick discriminants that
//! divide down to a sensible HTTP status.

use std::fmt;

use thiserror::Error;

/// Application-level response status (2000-4999).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum Status {
    /// The request was successful.
    Ok = 2000,
    /// The request was successful and a resource was created.
    Created = 2010,
    /// The request was successful and there is nothing to return.
    NoContent = 2040,

    /// The request failed field validation.
    FieldValidationFailure = 4000,

    /// The promise has already been resolved.
    PromiseAlreadyResolved = 4030,
    /// The promise has already been rejected.
    PromiseAlreadyRejected = 4031,
    /// The promise has already been canceled.
    PromiseAlreadyCanceled = 4032,
    /// The promise has already timed out.
    PromiseAlreadyTimedout = 4033,
    /// The lock is already acquired.
    LockAlreadyAcquired = 4034,
    /// The task is already claimed.
    TaskAlreadyClaimed = 4035,
    /// The task is already completed.
    TaskAlreadyCompleted = 4036,
    /// The task counter is invalid.
    TaskInvalidCounter = 4037,
    /// The task state is invalid.
    TaskInvalidState = 4038,

    /// The specified promise was not found.
    PromiseNotFound = 4040,
    /// The specified schedule was not found.
    ScheduleNotFound = 4041,
    /// The specified lock was not found.
    LockNotFound = 4042,
    /// The specified task was not found.
    TaskNotFound = 4043,

    /// A promise with this identifier already exists.
    PromiseAlreadyExists = 4090,
    /// A schedule with this identifier already exists.
    ScheduleAlreadyExists = 4091,
}

impl Status {
    /// Returns the stable numeric status code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Returns `true` for the 2xxx success statuses.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.code() < 3000
    }

    /// Maps to the HTTP status code.
    #[must_use]
    pub const fn http(self) -> u16 {
        self.code() / 10
    }

    /// Maps to the gRPC status code.
    #[must_use]
    pub const fn grpc(self) -> GrpcCode {
        match self {
            Self::Ok | Self::Created | Self::NoContent => GrpcCode::Ok,
            Self::FieldValidationFailure => GrpcCode::InvalidArgument,
            Self::PromiseAlreadyResolved
            | Self::PromiseAlreadyRejected
            | Self::PromiseAlreadyCanceled
            | Self::PromiseAlreadyTimedout
            | Self::LockAlreadyAcquired
            | Self::TaskAlreadyClaimed
            | Self::TaskAlreadyCompleted
            | Self::TaskInvalidCounter
            | Self::TaskInvalidState => GrpcCode::PermissionDenied,
            Self::PromiseNotFound
            | Self::ScheduleNotFound
            | Self::LockNotFound
            | Self::TaskNotFound => GrpcCode::NotFound,
            Self::PromiseAlreadyExists | Self::ScheduleAlreadyExists => GrpcCode::AlreadyExists,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::Ok | Self::Created | Self::NoContent => "The request was successful",
            Self::FieldValidationFailure => "The request is invalid",
            Self::PromiseAlreadyResolved => "The promise has already been resolved",
            Self::PromiseAlreadyRejected => "The promise has already been rejected",
            Self::PromiseAlreadyCanceled => "The promise has already been canceled",
            Self::PromiseAlreadyTimedout => "The promise has already timedout",
            Self::LockAlreadyAcquired => "The lock is already acquired",
            Self::TaskAlreadyClaimed => "The task is already claimed",
            Self::TaskAlreadyCompleted => "The task is already completed",
            Self::TaskInvalidCounter => "The task counter is invalid",
            Self::TaskInvalidState => "The task state is invalid",
            Self::PromiseNotFound => "The specified promise was not found",
            Self::ScheduleNotFound => "The specified schedule was not found",
            Self::LockNotFound => "The specified lock was not found",
            Self::TaskNotFound => "The specified task was not found",
            Self::PromiseAlreadyExists => "A promise with this identifier already exists",
            Self::ScheduleAlreadyExists => "A schedule with this identifier already exists",
        };
        f.write_str(description)
    }
}

/// gRPC status codes used by the fixed mappings.
///
/// The kernel does not link a gRPC stack; the front-end translates this
/// closed set into its transport's native codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrpcCode {
    /// The operation completed successfully.
    Ok,
    /// The client specified an invalid argument.
    InvalidArgument,
    /// The caller does not have permission for the operation.
    PermissionDenied,
    /// The requested entity was not found.
    NotFound,
    /// The entity the client attempted to create already exists.
    AlreadyExists,
    /// Internal server error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
}

/// Platform-level error codes (5000-5999).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unexpected internal failure.
    InternalServer = 5000,
    /// The store subsystem failed.
    AioStoreFailure = 5001,
    /// A stored record could not be parsed.
    AioStoreSerializationFailure = 5002,
    /// The system is shutting down and no longer accepts requests.
    SystemShuttingDown = 5030,
    /// The API submission queue is full.
    ApiSubmissionQueueFull = 5031,
    /// An AIO subsystem submission queue is full.
    AioSubmissionQueueFull = 5032,
    /// The scheduler cannot admit more coroutines.
    SchedulerQueueFull = 5033,
}

impl ErrorCode {
    /// Returns the stable numeric error code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Maps to the HTTP status code.
    #[must_use]
    pub const fn http(self) -> u16 {
        self.code() / 10
    }

    /// Maps to the gRPC status code.
    #[must_use]
    pub const fn grpc(self) -> GrpcCode {
        match self {
            Self::InternalServer | Self::AioStoreFailure | Self::AioStoreSerializationFailure => {
                GrpcCode::Internal
            }
            Self::SystemShuttingDown
            | Self::ApiSubmissionQueueFull
            | Self::AioSubmissionQueueFull
            | Self::SchedulerQueueFull => GrpcCode::Unavailable,
        }
    }
}

/// An unexpected infrastructure failure.
///
/// Carries a stable [`ErrorCode`], an internal `reason` string, and the
/// original cause for server-side logs. `Display` shows only the reason;
/// clients see the code's HTTP/gRPC mapping, never the cause.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct PlatformError {
    code: ErrorCode,
    reason: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PlatformError {
    /// Creates a platform error with no underlying cause.
    #[must_use]
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            source: None,
        }
    }

    /// Creates a platform error wrapping the original cause.
    #[must_use]
    pub fn with_source(
        code: ErrorCode,
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the internal reason string.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 2000);
        assert_eq!(Status::Created.code(), 2010);
        assert_eq!(Status::NoContent.code(), 2040);
        assert_eq!(Status::FieldValidationFailure.code(), 4000);
        assert_eq!(Status::PromiseAlreadyResolved.code(), 4030);
        assert_eq!(Status::PromiseAlreadyRejected.code(), 4031);
        assert_eq!(Status::PromiseAlreadyCanceled.code(), 4032);
        assert_eq!(Status::PromiseAlreadyTimedout.code(), 4033);
        assert_eq!(Status::LockAlreadyAcquired.code(), 4034);
        assert_eq!(Status::TaskAlreadyClaimed.code(), 4035);
        assert_eq!(Status::TaskAlreadyCompleted.code(), 4036);
        assert_eq!(Status::TaskInvalidCounter.code(), 4037);
        assert_eq!(Status::TaskInvalidState.code(), 4038);
        assert_eq!(Status::PromiseNotFound.code(), 4040);
        assert_eq!(Status::ScheduleNotFound.code(), 4041);
        assert_eq!(Status::LockNotFound.code(), 4042);
        assert_eq!(Status::TaskNotFound.code(), 4043);
        assert_eq!(Status::PromiseAlreadyExists.code(), 4090);
        assert_eq!(Status::ScheduleAlreadyExists.code(), 4091);
    }

    #[test]
    fn status_http_is_code_over_ten() {
        assert_eq!(Status::Ok.http(), 200);
        assert_eq!(Status::Created.http(), 201);
        assert_eq!(Status::NoContent.http(), 204);
        assert_eq!(Status::TaskAlreadyCompleted.http(), 403);
        assert_eq!(Status::TaskNotFound.http(), 404);
        assert_eq!(Status::PromiseAlreadyExists.http(), 409);
    }

    #[test]
    fn status_grpc_mapping_by_category() {
        assert_eq!(Status::Ok.grpc(), GrpcCode::Ok);
        assert_eq!(Status::Created.grpc(), GrpcCode::Ok);
        assert_eq!(Status::FieldValidationFailure.grpc(), GrpcCode::InvalidArgument);
        assert_eq!(Status::PromiseAlreadyTimedout.grpc(), GrpcCode::PermissionDenied);
        assert_eq!(Status::LockAlreadyAcquired.grpc(), GrpcCode::PermissionDenied);
        assert_eq!(Status::TaskInvalidCounter.grpc(), GrpcCode::PermissionDenied);
        assert_eq!(Status::TaskNotFound.grpc(), GrpcCode::NotFound);
        assert_eq!(Status::ScheduleAlreadyExists.grpc(), GrpcCode::AlreadyExists);
    }

    #[test]
    fn task_invalid_state_description_names_tasks() {
        assert_eq!(Status::TaskInvalidState.to_string(), "The task state is invalid");
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(ErrorCode::InternalServer.code(), 5000);
        assert_eq!(ErrorCode::AioStoreFailure.code(), 5001);
        assert_eq!(ErrorCode::AioStoreSerializationFailure.code(), 5002);
        assert_eq!(ErrorCode::SystemShuttingDown.code(), 5030);
        assert_eq!(ErrorCode::ApiSubmissionQueueFull.code(), 5031);
        assert_eq!(ErrorCode::AioSubmissionQueueFull.code(), 5032);
        assert_eq!(ErrorCode::SchedulerQueueFull.code(), 5033);
    }

    #[test]
    fn error_code_mappings() {
        assert_eq!(ErrorCode::InternalServer.http(), 500);
        assert_eq!(ErrorCode::SystemShuttingDown.http(), 503);
        assert_eq!(ErrorCode::AioStoreFailure.grpc(), GrpcCode::Internal);
        assert_eq!(ErrorCode::SchedulerQueueFull.grpc(), GrpcCode::Unavailable);
    }

    #[test]
    fn platform_error_preserves_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = PlatformError::with_source(ErrorCode::AioStoreFailure, "failed to read task", cause);

        assert_eq!(err.code(), ErrorCode::AioStoreFailure);
        assert_eq!(err.to_string(), "failed to read task");
        assert!(std::error::Error::source(&err).is_some());
    }
}
