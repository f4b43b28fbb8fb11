//! Periodic health probes, run while the status is `Up`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::metrics;
use crate::status::{Status, StatusFlag};

/// A health probe. `run` receives the operational state captured when the
/// status moved to `Up` and is invoked again `interval()` after each run returns.
#[async_trait]
pub trait Check<S>: Send + Sync + 'static {
    /// Used in logs and metric labels.
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    async fn run(&self, state: Arc<S>);
}

/// Closure-backed [`Check`], see [`Health::register_check_fn`](crate::Health::register_check_fn).
pub struct FnCheck<S> {
    name: String,
    interval: Duration,
    probe: Box<dyn Fn(Arc<S>) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl<S: Send + Sync + 'static> FnCheck<S> {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, probe: F) -> Self
    where
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            probe: Box::new(move |state| probe(state).boxed()),
        }
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Check<S> for FnCheck<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, state: Arc<S>) {
        (self.probe)(state).await
    }
}

/// Append-only list of checks, drained once when the status moves to `Up`.
pub(crate) struct HealthScheduler<S> {
    checks: Vec<Arc<dyn Check<S>>>,
}

impl<S: Send + Sync + 'static> HealthScheduler<S> {
    pub(crate) fn new() -> Self {
        Self { checks: Vec::new() }
    }

    pub(crate) fn register(&mut self, check: Arc<dyn Check<S>>) {
        debug!(
            check = check.name(),
            interval_secs = check.interval().as_secs_f64(),
            "Health: check registered"
        );
        self.checks.push(check);
    }

    pub(crate) fn take(&mut self) -> Vec<Arc<dyn Check<S>>> {
        std::mem::take(&mut self.checks)
    }
}

/// Everything a probe worker needs to run on its own.
pub(crate) struct WorkerContext<S> {
    pub(crate) service_name: Arc<str>,
    pub(crate) status: StatusFlag,
    pub(crate) down: CancellationToken,
    pub(crate) state: Arc<S>,
}

impl<S> Clone for WorkerContext<S> {
    fn clone(&self) -> Self {
        Self {
            service_name: self.service_name.clone(),
            status: self.status.clone(),
            down: self.down.clone(),
            state: self.state.clone(),
        }
    }
}

/// Spawns exactly one worker per check.
pub(crate) fn start<S: Send + Sync + 'static>(
    runtime: &runtime::Handle,
    checks: Vec<Arc<dyn Check<S>>>,
    ctx: WorkerContext<S>,
) {
    for check in checks {
        let span = info_span!("health_check", check = check.name());
        runtime.spawn(run_worker(check, ctx.clone()).instrument(span));
    }
}

async fn run_worker<S: Send + Sync + 'static>(check: Arc<dyn Check<S>>, ctx: WorkerContext<S>) {
    let interval = check.interval();
    loop {
        if ctx.status.load() != Status::Up {
            break;
        }

        let outcome = AssertUnwindSafe(check.run(ctx.state.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(()) => metrics::emit_check_run(&ctx.service_name, check.name(), "ok"),
            Err(payload) => {
                metrics::emit_check_run(&ctx.service_name, check.name(), "panicked");
                warn!(
                    check = check.name(),
                    panic = %panic_message(payload.as_ref()),
                    "Health: check panicked"
                );
            }
        }

        tokio::select! {
            _ = ctx.down.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!(check = check.name(), "Health: check worker stopped");
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
