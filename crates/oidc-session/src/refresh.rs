//! Single-flight coordination for token refresh
//!
//! One slot per session. The first caller to find it idle claims it and runs
//! the refresh; everyone arriving while it is pending subscribes to the
//! leader's watch channel and adopts the published outcome. The slot is reset
//! to idle in the same critical section that publishes, so no caller can join
//! a flight whose result is already stale.
//!
//! If the leader's future is dropped before publishing, a guard resets the
//! slot and waiters see the channel close. They then race to claim a fresh
//! flight with their own operation.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;

/// How a caller took part in a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ran the operation
    Leader,
    /// Adopted another caller's result
    Joined,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::Joined => "joined",
        }
    }
}

enum Slot<T> {
    Idle,
    Pending(watch::Receiver<Option<T>>),
}

pub struct SingleFlight<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
        }
    }
}

impl<T: Clone + Send + Sync> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), Slot::Pending(_))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `operation` unless a flight is already pending, in which case wait
    /// for that flight's outcome instead.
    pub async fn run<F, Fut>(&self, operation: F) -> (T, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let publisher = loop {
            let mut pending = {
                let mut slot = self.lock();
                match &*slot {
                    Slot::Idle => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Slot::Pending(rx);
                        break tx;
                    }
                    Slot::Pending(rx) => rx.clone(),
                }
            };

            debug!("joining in-flight operation");
            if let Ok(published) = pending.wait_for(Option::is_some).await {
                let outcome: Option<T> = (*published).clone();
                if let Some(outcome) = outcome {
                    return (outcome, Role::Joined);
                }
            }
            debug!("in-flight operation abandoned, retrying claim");
        };

        let mut guard = ClaimGuard {
            flight: self,
            armed: true,
        };
        let outcome = operation().await;
        {
            let mut slot = self.lock();
            *slot = Slot::Idle;
            guard.armed = false;
            // Waiters may all have gone away; a send error is fine.
            let _ = publisher.send(Some(outcome.clone()));
        }
        (outcome, Role::Leader)
    }
}

/// Resets the slot if the leader is dropped mid-flight.
struct ClaimGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    armed: bool,
}

impl<T> Drop for ClaimGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut slot = self
                .flight
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Slot::Idle;
        }
    }
}
