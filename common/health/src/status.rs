//! Process status flag and operational-state snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

const INIT: u8 = 0;
const UP: u8 = 1;
const DOWN: u8 = 2;
// Snapshot being published; reported as `Init` until the byte reaches `UP`.
const ACTIVATING: u8 = 3;

/// Process lifecycle status. Only ever moves forward: `Init < Up < Down`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Status {
    Init,
    Up,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Init => "init",
            Status::Up => "up",
            Status::Down => "down",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            INIT | ACTIVATING => Status::Init,
            UP => Status::Up,
            _ => Status::Down,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clone-able view on the status byte, handed to probe workers.
#[derive(Clone, Default)]
pub(crate) struct StatusFlag(Arc<AtomicU8>);

impl StatusFlag {
    pub(crate) fn load(&self) -> Status {
        Status::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Single source of truth for the status and the state captured at `Up`.
///
/// Reads never take a lock: the status is one atomic byte and the snapshot is
/// written once into a `OnceLock`.
pub(crate) struct StatusRegistry<S> {
    flag: StatusFlag,
    state: OnceLock<Arc<S>>,
    down: CancellationToken,
}

impl<S> StatusRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            flag: StatusFlag::default(),
            state: OnceLock::new(),
            down: CancellationToken::new(),
        }
    }

    pub(crate) fn current(&self) -> Status {
        self.flag.load()
    }

    pub(crate) fn flag(&self) -> StatusFlag {
        self.flag.clone()
    }

    /// Cancelled exactly once, when the status reaches `Down`.
    pub(crate) fn down_token(&self) -> CancellationToken {
        self.down.clone()
    }

    pub(crate) fn operational_state(&self) -> Option<Arc<S>> {
        self.state.get().cloned()
    }

    /// Moves `Init -> Up`. Only the winning caller's state is kept; it gets the
    /// stored snapshot back so it can start the probe workers.
    ///
    /// The snapshot is stored before the status byte reads `Up`, so any reader
    /// observing `Up` also observes the state.
    pub(crate) fn transition_up(&self, state: S) -> Option<Arc<S>> {
        if self
            .flag
            .0
            .compare_exchange(INIT, ACTIVATING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        // Only the compare-and-set winner reaches this point, so the cell is empty.
        let stored = self.state.get_or_init(|| Arc::new(state)).clone();

        // Fails only if `transition_down` ran in between; Down wins.
        self.flag
            .0
            .compare_exchange(ACTIVATING, UP, Ordering::Release, Ordering::Relaxed)
            .ok()
            .map(|_| stored)
    }

    /// Moves `Init | Up -> Down`, also from the middle of an activation. Returns false if the status was already `Down`.
    pub(crate) fn transition_down(&self) -> bool {
        let won = self
            .flag
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != DOWN).then_some(DOWN)
            })
            .is_ok();
        if won {
            self.down.cancel();
        }
        won
    }
}
