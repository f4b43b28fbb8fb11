//! Termination sources and the watcher task that turns the first termination
//! request into the `Down` transition.

use std::fmt;
use std::io;

use async_trait::async_trait;
use tokio::runtime;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What initiated shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// A [`ManualSource`] was fired.
    Manual,
    /// [`Health::trigger_shutdown`](crate::Health::trigger_shutdown) was called.
    Requested,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Interrupt => "sigint",
            TerminationReason::Terminate => "sigterm",
            TerminationReason::Manual => "manual",
            TerminationReason::Requested => "requested",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that eventually asks the process to terminate.
#[async_trait]
pub trait TerminationSource: Send + 'static {
    /// Resolves on the first termination request.
    async fn recv(&mut self) -> TerminationReason;
}

/// SIGINT and SIGTERM, through tokio's signal driver.
///
/// Handlers are installed by [`OsSignals::install`]; once installed, the
/// default action of these signals (exiting the process) is replaced for the
/// rest of the process's life. Signals arriving after the first one are
/// swallowed, so a repeated Ctrl-C does not abort a hung shutdown: bound the
/// final [`Health::wait_for_completion`](crate::Health::wait_for_completion)
/// and exit once it returns, otherwise only SIGKILL ends the process.
pub struct OsSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl OsSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }
}

#[async_trait]
impl TerminationSource for OsSignals {
    async fn recv(&mut self) -> TerminationReason {
        tokio::select! {
            _ = self.interrupt.recv() => {
                info!("received SIGINT");
                TerminationReason::Interrupt
            }
            _ = self.terminate.recv() => {
                info!("received SIGTERM");
                TerminationReason::Terminate
            }
        }
    }
}

/// Source fired by hand through its [`ManualTrigger`]s. Never resolves if no
/// trigger is fired, which makes it the source of choice when signals are not trapped.
#[derive(Default)]
pub struct ManualSource {
    token: CancellationToken,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) -> ManualTrigger {
        ManualTrigger {
            token: self.token.clone(),
        }
    }
}

#[async_trait]
impl TerminationSource for ManualSource {
    async fn recv(&mut self) -> TerminationReason {
        self.token.cancelled().await;
        TerminationReason::Manual
    }
}

/// Clone-able handle firing a [`ManualSource`], e.g. from an admin route or a test.
#[derive(Clone)]
pub struct ManualTrigger {
    token: CancellationToken,
}

impl ManualTrigger {
    pub fn fire(&self) {
        self.token.cancel();
    }
}

/// Owns the single subscription to a termination source.
pub(crate) struct SignalWatcher {
    stop: CancellationToken,
}

impl SignalWatcher {
    pub(crate) fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
        }
    }

    /// Spawns the watcher task. `on_terminate` runs at most once, and never
    /// after [`unsubscribe`](SignalWatcher::unsubscribe).
    pub(crate) fn spawn<F>(
        &self,
        runtime: &runtime::Handle,
        mut source: Box<dyn TerminationSource>,
        on_terminate: F,
    ) where
        F: FnOnce(TerminationReason) + Send + 'static,
    {
        let stop = self.stop.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!("Health: termination watcher unsubscribed");
                }
                reason = source.recv() => on_terminate(reason),
            }
            // The source is dropped here, no further delivery.
        });
    }

    pub(crate) fn unsubscribe(&self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn os_signals_wait_for_a_signal() {
        let mut source = OsSignals::install().expect("failed to install handlers");
        let result = timeout(Duration::from_millis(100), source.recv()).await;
        assert!(
            result.is_err(),
            "no termination reason should be produced without a signal"
        );
    }

    #[tokio::test]
    async fn manual_source_fires_once_triggered() {
        let mut source = ManualSource::new();
        let trigger = source.trigger();

        assert!(timeout(Duration::from_millis(50), source.recv()).await.is_err());

        trigger.fire();
        let reason = timeout(Duration::from_secs(1), source.recv())
            .await
            .expect("timed out");
        assert_eq!(reason, TerminationReason::Manual);
    }

    #[tokio::test]
    async fn watcher_forwards_first_event() {
        let source = ManualSource::new();
        let trigger = source.trigger();
        let watcher = SignalWatcher::new();
        let (tx, rx) = oneshot::channel();

        watcher.spawn(
            &runtime::Handle::current(),
            Box::new(source),
            move |reason| {
                tx.send(reason).ok();
            },
        );
        trigger.fire();

        let reason = timeout(Duration::from_secs(1), rx)
            .await
            .expect("timed out")
            .expect("watcher dropped the sender");
        assert_eq!(reason, TerminationReason::Manual);
    }

    #[tokio::test]
    async fn unsubscribed_watcher_ignores_source() {
        let source = ManualSource::new();
        let trigger = source.trigger();
        let watcher = SignalWatcher::new();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = fired.clone();
        watcher.spawn(&runtime::Handle::current(), Box::new(source), move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst)
        });
        watcher.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.fire();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
