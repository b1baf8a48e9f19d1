//! Cancellable abort signal shared by all in-flight operations.
//!
//! Every scheduler run binds its fetch tasks to one [`AbortToken`].
//! Pausing or cancelling a transfer signals the current token; resuming
//! issues a fresh token with a higher generation so that any task still
//! holding a reference to the pre-pause token fails fast instead of
//! resuming writes against a rebuilt queue.

use tokio_util::sync::CancellationToken;

/// Cancellation signal for one scheduler run of a transfer session.
#[derive(Debug)]
pub struct AbortToken {
    token: CancellationToken,
    generation: u64,
}

impl AbortToken {
    /// Creates a token for the given generation.
    pub fn new(generation: u64) -> Self {
        Self {
            token: CancellationToken::new(),
            generation,
        }
    }

    /// The generation this token belongs to.
    ///
    /// Generation 0 is the initial run; each resume increments it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signals the token. All waiters wake and all subsequent
    /// [`is_aborted`](Self::is_aborted) checks return true.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Whether the token has been signalled.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the token is signalled.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }
}
