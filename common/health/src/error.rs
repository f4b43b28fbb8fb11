//! Errors returned while building a [`Health`](crate::Health) handle or registering checks.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    /// [`HealthBuilder::build`](crate::HealthBuilder::build) was called outside a tokio runtime.
    #[error("health must be built from within a tokio runtime")]
    NoRuntime,

    /// SIGINT/SIGTERM handlers could not be installed.
    #[error("failed to install termination signal handlers")]
    SignalHandler(#[source] io::Error),

    /// Checks are scheduled once, when the status moves to `Up`; later registrations are refused.
    #[error("check '{check}' registered after health checks were scheduled")]
    ChecksAlreadyScheduled { check: String },
}
