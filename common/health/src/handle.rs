//! The `Health` handle: status, checks, termination watcher and shutdown plan
//! behind one clone-able context object.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::HealthError;
use crate::metrics;
use crate::scheduler::{self, Check, FnCheck, HealthScheduler, WorkerContext};
use crate::shutdown::{
    self, CallbackMode, ShutdownCoordinator, ShutdownPlan, ShutdownReport, ShutdownWait,
    WaitBudget,
};
use crate::signals::{
    ManualSource, OsSignals, SignalWatcher, TerminationReason, TerminationSource,
};
use crate::status::{Status, StatusRegistry};

/// Builder for [`Health`]; see [`Health::builder`].
pub struct HealthBuilder {
    name: String,
    shutdown_delay: Duration,
    trap_signals: bool,
    source: Option<Box<dyn TerminationSource>>,
}

impl HealthBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shutdown_delay: Duration::ZERO,
            trap_signals: true,
            source: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.service_name)
            .with_shutdown_delay(config.shutdown_delay.0)
            .with_trap_signals(config.trap_signals)
    }

    /// Grace period between the `Down` transition and the first shutdown callback.
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    /// Listen for SIGINT/SIGTERM (default: true). Ignored when a source is set
    /// with [`with_termination_source`](HealthBuilder::with_termination_source).
    pub fn with_trap_signals(mut self, trap: bool) -> Self {
        self.trap_signals = trap;
        self
    }

    pub fn with_termination_source(mut self, source: impl TerminationSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Subscribes to the termination source. Must be called from within a tokio runtime.
    pub fn build<S: Send + Sync + 'static>(self) -> Result<Health<S>, HealthError> {
        let runtime = runtime::Handle::try_current().map_err(|_| HealthError::NoRuntime)?;

        let source: Box<dyn TerminationSource> = match self.source {
            Some(source) => source,
            None if self.trap_signals => {
                Box::new(OsSignals::install().map_err(HealthError::SignalHandler)?)
            }
            None => Box::new(ManualSource::new()),
        };

        let inner = Arc::new(Inner {
            name: Arc::from(self.name.as_str()),
            status: StatusRegistry::new(),
            registrations: Mutex::new(Registrations {
                checks: HealthScheduler::new(),
                plan: ShutdownPlan::default(),
            }),
            coordinator: ShutdownCoordinator::new(self.shutdown_delay),
            watcher: SignalWatcher::new(),
            runtime,
        });

        let weak: Weak<Inner<S>> = Arc::downgrade(&inner);
        inner.watcher.spawn(&inner.runtime, source, move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.terminate(reason);
            }
        });

        debug!(service = %inner.name, "Health: created");
        Ok(Health { inner })
    }
}

/// Process lifecycle handle: status, health checks and graceful shutdown.
///
/// Build one per process at startup and clone it to whoever needs it; all
/// clones share the same state.
///
/// ```text
/// Init --set_operational_up--> Up --signal | trigger_shutdown--> Down
///      (delay) --> phase 0 --> phase 1 --> ... --> completed
/// ```
pub struct Health<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Health<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Registrations<S> {
    checks: HealthScheduler<S>,
    plan: ShutdownPlan,
}

struct Inner<S> {
    name: Arc<str>,
    status: StatusRegistry<S>,
    registrations: Mutex<Registrations<S>>,
    coordinator: ShutdownCoordinator,
    watcher: SignalWatcher,
    runtime: runtime::Handle,
}

impl<S: Send + Sync + 'static> Inner<S> {
    // Nothing panics while holding the lock, a poisoned lock still holds consistent lists.
    fn registrations(&self) -> MutexGuard<'_, Registrations<S>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn terminate(self: &Arc<Self>, reason: TerminationReason) -> bool {
        let down_at = Instant::now();
        if !self.status.transition_down() {
            debug!(reason = %reason, "Health: already down, termination request ignored");
            return false;
        }
        self.watcher.unsubscribe();

        metrics::emit_status_transition(&self.name, Status::Down.as_str());
        metrics::emit_shutdown_initiated(&self.name, reason.as_str());
        info!(service = %self.name, reason = %reason, "Health: status down, shutdown initiated");

        let phases = self.registrations().plan.take();
        let inner = self.clone();
        self.runtime.spawn(async move {
            inner
                .coordinator
                .run(&inner.name, reason, phases, down_at)
                .await;
        });
        true
    }
}

impl Health<()> {
    /// Start building a handle. `name` labels logs and metrics.
    pub fn builder(name: &str) -> HealthBuilder {
        HealthBuilder::new(name)
    }
}

impl<S: Send + Sync + 'static> Health<S> {
    /// Moves `Init -> Up`, captures `state` and starts one worker per registered
    /// check. Only the first call has an effect; returns whether this call did it.
    pub fn set_operational_up(&self, state: S) -> bool {
        let inner = &self.inner;
        let Some(state) = inner.status.transition_up(state) else {
            debug!(status = %inner.status.current(), "Health: already activated, ignoring");
            return false;
        };

        let checks = inner.registrations().checks.take();
        metrics::emit_status_transition(&inner.name, Status::Up.as_str());
        info!(service = %inner.name, checks = checks.len(), "Health: status up");

        scheduler::start(
            &inner.runtime,
            checks,
            WorkerContext {
                service_name: inner.name.clone(),
                status: inner.status.flag(),
                down: inner.status.down_token(),
                state,
            },
        );
        true
    }

    pub fn status(&self) -> Status {
        self.inner.status.current()
    }

    pub fn is_up(&self) -> bool {
        self.status() == Status::Up
    }

    pub fn is_down(&self) -> bool {
        self.status() == Status::Down
    }

    /// State captured by [`set_operational_up`](Health::set_operational_up), `None` before that.
    pub fn operational_state(&self) -> Option<Arc<S>> {
        self.inner.status.operational_state()
    }

    /// Adds a check, run every `check.interval()` once the status is `Up`.
    ///
    /// Refused with [`HealthError::ChecksAlreadyScheduled`] once checks have
    /// been scheduled, silently ignored once the status is `Down`.
    pub fn register_check(&self, check: impl Check<S>) -> Result<(), HealthError> {
        let mut registrations = self.inner.registrations();
        match self.inner.status.current() {
            Status::Init => {
                registrations.checks.register(Arc::new(check));
                Ok(())
            }
            Status::Up => Err(HealthError::ChecksAlreadyScheduled {
                check: check.name().to_string(),
            }),
            Status::Down => {
                debug!(check = check.name(), "Health: status down, check ignored");
                Ok(())
            }
        }
    }

    pub fn register_check_fn<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        probe: F,
    ) -> Result<(), HealthError>
    where
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_check(FnCheck::new(name, interval, probe))
    }
}

impl<S: Send + Sync + 'static> Health<S> {
    /// Adds `callback` in a new phase: it starts only after every callback
    /// registered before it has returned.
    pub fn open_phase<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_shutdown_callback(callback, CallbackMode::Sync)
    }

    /// Adds `callback` to the latest phase (opening phase 0 if needed); it runs
    /// concurrently with the other callbacks of that phase.
    pub fn append_to_phase<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_shutdown_callback(callback, CallbackMode::Async)
    }

    /// Registration is dropped once the status is `Down`.
    pub fn register_shutdown_callback<F, Fut>(&self, callback: F, mode: CallbackMode)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut registrations = self.inner.registrations();
        if self.inner.status.current() == Status::Down {
            debug!(mode = ?mode, "Health: status down, shutdown callback dropped");
            return;
        }
        registrations.plan.add(shutdown::boxed(callback), mode);
    }

    /// Takes effect if set before shutdown starts.
    pub fn set_shutdown_delay(&self, delay: Duration) {
        self.inner.coordinator.set_delay(delay);
    }

    pub fn shutdown_delay(&self) -> Duration {
        self.inner.coordinator.delay()
    }

    /// Same as receiving SIGINT/SIGTERM. Returns true for the call that moved the
    /// status to `Down`; later calls do nothing.
    pub fn trigger_shutdown(&self) -> bool {
        self.inner.terminate(TerminationReason::Requested)
    }

    /// Resolves when the status reaches `Down`; pass to
    /// `axum::serve(..).with_graceful_shutdown(health.shutdown_signal())`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let down = self.inner.status.down_token();
        async move {
            down.cancelled().await;
        }
    }

    /// Waits for every shutdown phase to return, or for `budget` to run out.
    /// Shutdown keeps running in the background either way.
    pub async fn wait_for_completion(&self, budget: impl Into<WaitBudget>) -> ShutdownWait {
        self.inner.coordinator.wait(budget.into()).await
    }

    /// Available once shutdown has completed.
    pub fn shutdown_report(&self) -> Option<&ShutdownReport> {
        self.inner.coordinator.report()
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.inner.coordinator.is_completed()
    }
}
