//! Ordered shutdown phases, the pre-shutdown delay and the completion wait.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::scheduler::panic_message;
use crate::signals::TerminationReason;

pub(crate) type Callback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub(crate) fn boxed<F, Fut>(callback: F) -> Callback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || callback().boxed())
}

/// How [`Health::register_shutdown_callback`](crate::Health::register_shutdown_callback)
/// places a callback in the shutdown plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackMode {
    /// Opens a new phase; runs after everything registered before it has returned.
    Sync,
    /// Joins the most recently opened phase and runs concurrently with it.
    Async,
}

/// Callbacks that run concurrently with each other.
#[derive(Default)]
pub(crate) struct Phase {
    callbacks: Vec<Callback>,
}

impl Phase {
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }
}

/// The phase list, guarded by the registration lock.
#[derive(Default)]
pub(crate) struct ShutdownPlan {
    phases: Vec<Phase>,
}

impl ShutdownPlan {
    pub(crate) fn open_phase(&mut self, callback: Callback) {
        self.phases.push(Phase {
            callbacks: vec![callback],
        });
    }

    pub(crate) fn append_to_phase(&mut self, callback: Callback) {
        match self.phases.last_mut() {
            Some(phase) => phase.callbacks.push(callback),
            None => self.open_phase(callback),
        }
    }

    pub(crate) fn add(&mut self, callback: Callback, mode: CallbackMode) {
        match mode {
            CallbackMode::Sync => self.open_phase(callback),
            CallbackMode::Async => self.append_to_phase(callback),
        }
    }

    pub(crate) fn take(&mut self) -> Vec<Phase> {
        std::mem::take(&mut self.phases)
    }

    #[cfg(test)]
    fn shape(&self) -> Vec<usize> {
        self.phases.iter().map(Phase::len).collect()
    }
}

/// A shutdown callback that panicked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Zero-based phase index.
    pub phase: usize,
    /// Position of the callback within its phase.
    pub index: usize,
    pub message: String,
}

/// Summary published once the last phase has returned.
#[derive(Clone, Debug)]
pub struct ShutdownReport {
    pub reason: TerminationReason,
    pub phases: usize,
    pub callbacks: usize,
    /// From the `Down` transition to the end of the last phase, delay included.
    pub elapsed: Duration,
    pub failures: Vec<CallbackFailure>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How long a caller is willing to wait for shutdown to complete.
#[derive(Clone, Debug)]
pub enum WaitBudget {
    Unbounded,
    Timeout(Duration),
    Deadline(Instant),
    Cancel(CancellationToken),
}

impl From<Duration> for WaitBudget {
    fn from(d: Duration) -> Self {
        WaitBudget::Timeout(d)
    }
}

impl From<Instant> for WaitBudget {
    fn from(deadline: Instant) -> Self {
        WaitBudget::Deadline(deadline)
    }
}

impl From<CancellationToken> for WaitBudget {
    fn from(token: CancellationToken) -> Self {
        WaitBudget::Cancel(token)
    }
}

/// Which condition ended a [`wait_for_completion`](crate::Health::wait_for_completion).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownWait {
    Completed,
    TimedOut,
    Cancelled,
}

/// Runs the plan once, and lets any number of callers wait for it.
pub(crate) struct ShutdownCoordinator {
    delay_nanos: AtomicU64,
    completed: CancellationToken,
    report: OnceLock<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub(crate) fn new(delay: Duration) -> Self {
        let coordinator = Self {
            delay_nanos: AtomicU64::new(0),
            completed: CancellationToken::new(),
            report: OnceLock::new(),
        };
        coordinator.set_delay(delay);
        coordinator
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        self.delay_nanos.store(nanos, Ordering::Relaxed);
    }

    pub(crate) fn delay(&self) -> Duration {
        Duration::from_nanos(self.delay_nanos.load(Ordering::Relaxed))
    }

    pub(crate) fn report(&self) -> Option<&ShutdownReport> {
        self.report.get()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Executes the phases frozen at the `Down` transition. Called once.
    pub(crate) async fn run(
        &self,
        service_name: &str,
        reason: TerminationReason,
        phases: Vec<Phase>,
        down_at: Instant,
    ) {
        let delay = self.delay();
        if !delay.is_zero() {
            info!(
                delay_secs = delay.as_secs_f64(),
                "Health: waiting before running shutdown callbacks"
            );
            tokio::time::sleep_until(down_at + delay).await;
        }

        let phase_count = phases.len();
        let mut callbacks = 0;
        let mut failures = Vec::new();

        for (phase_index, phase) in phases.into_iter().enumerate() {
            let phase_clock = Instant::now();
            callbacks += phase.len();

            let handles: Vec<_> = phase
                .callbacks
                .into_iter()
                .map(|callback| tokio::spawn(async move { callback().await }))
                .collect();

            for (index, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(()) => metrics::emit_shutdown_callback_result(service_name, "completed"),
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic().as_ref());
                        metrics::emit_shutdown_callback_result(service_name, "panicked");
                        warn!(
                            phase = phase_index,
                            callback = index,
                            panic = %message,
                            "Health: shutdown callback panicked"
                        );
                        failures.push(CallbackFailure {
                            phase: phase_index,
                            index,
                            message,
                        });
                    }
                    Err(e) => {
                        metrics::emit_shutdown_callback_result(service_name, "cancelled");
                        warn!(
                            phase = phase_index,
                            callback = index,
                            error = %e,
                            "Health: shutdown callback cancelled"
                        );
                        failures.push(CallbackFailure {
                            phase: phase_index,
                            index,
                            message: e.to_string(),
                        });
                    }
                }
            }

            let elapsed = phase_clock.elapsed();
            metrics::emit_shutdown_phase_duration(service_name, elapsed.as_secs_f64());
            debug!(
                phase = phase_index,
                duration_secs = elapsed.as_secs_f64(),
                "Health: shutdown phase completed"
            );
        }

        let report = ShutdownReport {
            reason,
            phases: phase_count,
            callbacks,
            elapsed: down_at.elapsed(),
            failures,
        };
        let clean = report.is_clean();
        metrics::emit_shutdown_completed(service_name, clean);
        if clean {
            info!(
                clean,
                phases = report.phases,
                callbacks = report.callbacks,
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Health: shutdown complete"
            );
        } else {
            warn!(
                clean,
                failures = report.failures.len(),
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Health: shutdown complete with failures"
            );
        }

        if self.report.set(report).is_err() {
            warn!("Health: shutdown report already published");
        }
        self.completed.cancel();
    }

    pub(crate) async fn wait(&self, budget: WaitBudget) -> ShutdownWait {
        let completed = self.completed.cancelled();
        match budget {
            WaitBudget::Unbounded => {
                completed.await;
                ShutdownWait::Completed
            }
            WaitBudget::Timeout(timeout) => {
                match tokio::time::timeout(timeout, completed).await {
                    Ok(()) => ShutdownWait::Completed,
                    Err(_) => ShutdownWait::TimedOut,
                }
            }
            WaitBudget::Deadline(deadline) => {
                match tokio::time::timeout_at(deadline, completed).await {
                    Ok(()) => ShutdownWait::Completed,
                    Err(_) => ShutdownWait::TimedOut,
                }
            }
            WaitBudget::Cancel(token) => {
                tokio::select! {
                    biased;

                    _ = completed => ShutdownWait::Completed,
                    _ = token.cancelled() => ShutdownWait::Cancelled,
                }
            }
        }
    }
}
