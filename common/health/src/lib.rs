//! Process lifecycle for long-running services: an `Init -> Up -> Down` status,
//! periodic health checks while `Up`, SIGINT/SIGTERM trapping, and graceful
//! shutdown through ordered phases of concurrent callbacks, with an optional
//! delay before the first phase and a bounded wait for the last one.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use health::{Health, ShutdownWait};
//!
//! # async fn example() -> Result<(), health::HealthError> {
//! let health = Health::builder("capture")
//!     .with_shutdown_delay(Duration::from_secs(5))
//!     .build::<String>()?;
//!
//! health.register_check_fn("db", Duration::from_secs(10), |dsn| async move {
//!     tracing::info!(%dsn, "pinging database");
//! })?;
//! health.append_to_phase(|| async { /* stop accepting traffic */ });
//! health.open_phase(|| async { /* flush buffers, once traffic has stopped */ });
//!
//! health.set_operational_up("postgres://localhost/db".to_string());
//! // ... serve until a signal arrives, e.g. with_graceful_shutdown(health.shutdown_signal())
//!
//! if health.wait_for_completion(Duration::from_secs(30)).await == ShutdownWait::TimedOut {
//!     tracing::warn!("shutdown callbacks still running, exiting anyway");
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handle;
mod metrics;
mod scheduler;
mod shutdown;
mod signals;
mod status;

pub use config::{Config, EnvMsDuration, ParseEnvMsDurationError};
pub use error::HealthError;
pub use handle::{Health, HealthBuilder};
pub use scheduler::{Check, FnCheck};
pub use shutdown::{CallbackFailure, CallbackMode, ShutdownReport, ShutdownWait, WaitBudget};
pub use signals::{ManualSource, ManualTrigger, OsSignals, TerminationReason, TerminationSource};
pub use status::Status;
