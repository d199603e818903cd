use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot::{self, error::TryRecvError};

use tracing::{debug, error, warn};

use crate::outcome::{FailureKind, Outcome};

const OPEN: u8 = 0;
const RESOLVED: u8 = 1;
// Resolved by the owner going away, the outcome is dropped.
const DISCARDED: u8 = 2;

#[derive(Debug)]
struct Slot {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Slot {
    // Moves the slot out of `OPEN`. Only one caller ever wins.
    fn close(&self, next: u8) -> Result<oneshot::Sender<Outcome>, u8> {
        self.state
            .compare_exchange(OPEN, next, Ordering::AcqRel, Ordering::Acquire)?;
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(next)
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        match self.close(RESOLVED) {
            Ok(sender) => {
                if let Err(outcome) = sender.send(outcome) {
                    debug!("Nobody is waiting for the response, dropping: {outcome}");
                }
                true
            }
            Err(DISCARDED) => {
                debug!("Response already discarded, dropping late outcome: {outcome}");
                false
            }
            Err(_) => {
                warn!("Response already resolved, ignoring duplicate outcome: {outcome}");
                false
            }
        }
    }

    fn claim(&self) -> Option<oneshot::Sender<Outcome>> {
        self.close(RESOLVED).ok()
    }

    fn discard(&self) -> bool {
        self.close(DISCARDED).is_ok()
    }

    fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }
}

/// Creates a connected [`Responder`] and [`PendingResponse`] pair.
///
/// The handle starts `Open`.
#[must_use]
pub fn channel() -> (Responder, PendingResponse) {
    let (sender, receiver) = oneshot::channel();
    let slot = Arc::new(Slot {
        state: AtomicU8::new(OPEN),
        sender: Mutex::new(Some(sender)),
    });

    (
        Responder {
            slot: Arc::clone(&slot),
        },
        PendingResponse {
            slot: Arc::downgrade(&slot),
            receiver,
            received: None,
        },
    )
}

/// The capability to resolve a [`PendingResponse`].
///
/// Cloning a [`Responder`] shares the same slot, so the first resolution
/// across all clones wins.
#[derive(Debug, Clone)]
pub struct Responder {
    slot: Arc<Slot>,
}

impl Responder {
    /// Resolves the response.
    ///
    /// Returns `false` and leaves the response untouched when it was already
    /// resolved or discarded.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        self.slot.resolve(outcome)
    }

    /// Claims the response while it is still `Open`.
    ///
    /// A claimed response counts as resolved: later resolutions, timeouts
    /// and discards leave it to the [`Claim`]. Returns [`None`] when the
    /// response is no longer `Open`.
    #[must_use]
    pub fn claim(&self) -> Option<Claim> {
        self.slot.claim().map(|sender| Claim { sender })
    }

    /// Checks whether the response is no longer `Open`.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }
}

/// Exclusive right to deliver the outcome of a claimed response.
///
/// Dropping a [`Claim`] without resolving it fails the response as
/// internal.
#[derive(Debug)]
pub struct Claim {
    sender: oneshot::Sender<Outcome>,
}

impl Claim {
    /// Delivers the outcome.
    pub fn resolve(self, outcome: Outcome) {
        if let Err(outcome) = self.sender.send(outcome) {
            debug!("Nobody is waiting for the response, dropping: {outcome}");
        }
    }
}

/// A response slot resolved later by a [`Responder`].
///
/// Dropping a [`PendingResponse`] before resolution discards it: any late
/// resolution becomes a no-op.
#[derive(Debug)]
pub struct PendingResponse {
    slot: Weak<Slot>,
    receiver: oneshot::Receiver<Outcome>,
    // Outcome already taken off the receiver.
    received: Option<Outcome>,
}

impl PendingResponse {
    /// Checks whether the response has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        // A dropped slot means every responder is gone.
        self.slot.upgrade().is_none_or(|slot| slot.is_resolved())
    }

    /// Returns the outcome without waiting, if available.
    ///
    /// Once available, every call returns the same outcome.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        if self.received.is_none() {
            self.received = match self.receiver.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(abandoned()),
            };
        }
        self.received.clone()
    }

    /// Waits for the outcome.
    ///
    /// If every [`Responder`] is dropped without resolving, the outcome is
    /// an internal failure.
    pub async fn wait(mut self) -> Outcome {
        if let Some(outcome) = self.received.take() {
            return outcome;
        }
        (&mut self.receiver).await.unwrap_or_else(|_| abandoned())
    }

    /// Waits for the outcome for at most `timeout`.
    ///
    /// On expiry the response is resolved with a timeout failure, unless a
    /// responder wins the race or holds a [`Claim`], in which case its
    /// outcome is returned.
    pub async fn wait_timeout(mut self, timeout: Duration) -> Outcome {
        if let Some(outcome) = self.received.take() {
            return outcome;
        }

        if let Ok(received) = tokio::time::timeout(timeout, &mut self.receiver).await {
            return received.unwrap_or_else(|_| abandoned());
        }

        // A claimed response is left to its claim.
        if let Some(sender) = self.slot.upgrade().and_then(|slot| slot.claim()) {
            warn!("No response within {} ms", timeout.as_millis());
            // The receiver is still alive.
            let _ = sender.send(Outcome::timeout());
        }

        (&mut self.receiver).await.unwrap_or_else(|_| abandoned())
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade()
            && slot.discard()
        {
            debug!("Response discarded before resolution");
        }
    }
}

fn abandoned() -> Outcome {
    error!("Response abandoned without resolution");
    Outcome::failure(FailureKind::Internal)
}
