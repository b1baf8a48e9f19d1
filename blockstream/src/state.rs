//! Transfer lifecycle state and the shared control plane.
//!
//! State transitions are owned by the session's run loop; control
//! callers only set intent flags (paused, cancelled) and signal the
//! current abort token. The run loop observes the flags when the
//! scheduler settles and decides which terminal or paused state to
//! publish, so observers never see a state the engine has not actually
//! reached.
//!
//! ```text
//!                 ┌────────────┐  resume   ┌────────┐
//!   Idle ──run──▶ │  Running   │ ◀──────── │ Paused │
//!                 └─────┬──────┘ ──pause──▶└───┬────┘
//!                       │                      │ cancel
//!          ┌────────────┼──────────────┐       │
//!          ▼            ▼              ▼       ▼
//!        Done        Errored        Cancelled ◀┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::abort::AbortToken;

/// Lifecycle state of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Created, not yet running.
    Idle,
    /// Fetching and flushing blocks.
    Running,
    /// Suspended; incomplete blocks reverted, complete ones retained.
    Paused,
    /// All content delivered and the sink closed.
    Done,
    /// Cancelled by the caller; the sink was aborted.
    Cancelled,
    /// Failed; the sink was aborted.
    Errored,
}

impl TransferState {
    /// Whether the session can never leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Errored)
    }
}

/// Control state shared between the run loop and control handles.
#[derive(Debug)]
pub(crate) struct ControlState {
    state_tx: watch::Sender<TransferState>,
    paused: AtomicBool,
    cancelled: AtomicBool,
    abort: Mutex<Arc<AbortToken>>,
    resume: Notify,
    generation: AtomicU64,
}

impl ControlState {
    pub fn new() -> (Arc<Self>, watch::Receiver<TransferState>) {
        let (state_tx, state_rx) = watch::channel(TransferState::Idle);
        let control = Arc::new(Self {
            state_tx,
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            abort: Mutex::new(Arc::new(AbortToken::new(0))),
            resume: Notify::new(),
            generation: AtomicU64::new(0),
        });
        (control, state_rx)
    }

    pub fn state(&self) -> TransferState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, state: TransferState) {
        debug!(?state, "transfer state change");
        // send_replace updates the stored value even when no receiver
        // exists; send() would drop the update on the floor.
        self.state_tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.state_tx.subscribe()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The abort token bound to the current scheduler run.
    pub fn current_abort(&self) -> Arc<AbortToken> {
        self.abort.lock().clone()
    }

    /// Issues a fresh abort token for the next run. Tasks still holding
    /// the previous generation's token stay aborted.
    pub fn next_abort(&self) -> Arc<AbortToken> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = Arc::new(AbortToken::new(generation));
        *self.abort.lock() = token.clone();
        token
    }

    /// Requests a pause: sets the intent flag and signals the current
    /// run's token. No-op once the session is terminal.
    pub fn request_pause(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.current_abort().abort();
    }

    /// Requests a resume. The run loop wakes, rebuilds the queue from
    /// the flush cursor and continues.
    pub fn request_resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.resume.notify_one();
        }
    }

    /// Requests cancellation: signals the current token and wakes a
    /// paused run loop so it can reach the cancelled state.
    pub fn request_cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.current_abort().abort();
        self.resume.notify_one();
    }

    /// Parks until resume or cancel is requested. A notification sent
    /// before this call is not lost; `Notify` stores one permit.
    pub async fn wait_for_resume(&self) {
        while self.is_paused() && !self.is_cancelled() {
            self.resume.notified().await;
        }
    }
}
