//! Admission gate: a counting semaphore with a FIFO wait queue and a bounded wait.
//!
//! Slots are handed over directly on release: the releasing permit pops the
//! oldest waiter and increments the active count on its behalf, so a newly
//! arriving job can never overtake a queued one.

use crate::{Error, Result};
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

struct Waiter {
    ticket: u64,
    wake: oneshot::Sender<()>,
}

struct GateState {
    active: usize,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
}

struct GateInner {
    max_concurrent: usize,
    queue_timeout: Duration,
    state: Mutex<GateState>,
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        while state.active < self.max_concurrent {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.active += 1;
            if waiter.wake.send(()).is_ok() {
                debug!("admission slot handed to ticket {}", waiter.ticket);
                break;
            }
            // Waiter went away without dequeuing itself.
            state.active -= 1;
        }
    }
}

/// Bounds how many jobs may hold a rendering surface simultaneously.
///
/// Cloning is cheap and yields a handle to the same gate.
#[derive(Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

impl AdmissionGate {
    pub fn new(max_concurrent: usize, queue_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                max_concurrent: max_concurrent.max(1),
                queue_timeout,
                state: Mutex::new(GateState {
                    active: 0,
                    next_ticket: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Wait for a slot.
    ///
    /// Returns immediately while capacity remains; otherwise queues behind
    /// earlier callers and fails with [`Error::Busy`] once the queue timeout
    /// elapses. Dropping the returned future gives up the place in the queue.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let started = Instant::now();
        let (ticket, rx) = {
            let mut state = self.inner.lock();
            if state.active < self.inner.max_concurrent {
                state.active += 1;
                return Ok(self.permit());
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (wake, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { ticket, wake });
            debug!(
                "admission queue: ticket {} waiting ({} active, {} queued)",
                ticket,
                state.active,
                state.waiters.len()
            );
            (ticket, rx)
        };

        let mut pending = PendingTicket {
            gate: &*self.inner,
            ticket,
            rx,
            settled: false,
        };

        match tokio::time::timeout(self.inner.queue_timeout, &mut pending.rx).await {
            Ok(Ok(())) => {
                pending.settled = true;
                Ok(self.permit())
            }
            Ok(Err(_)) => {
                pending.settled = true;
                Err(Error::Other("admission gate dropped a queued ticket".into()))
            }
            Err(_) => {
                let mut state = self.inner.lock();
                if let Some(pos) = state.waiters.iter().position(|w| w.ticket == ticket) {
                    state.waiters.remove(pos);
                    pending.settled = true;
                    let active = state.active;
                    drop(state);
                    debug!("admission queue: ticket {} timed out", ticket);
                    return Err(Error::Busy {
                        active,
                        max_concurrent: self.inner.max_concurrent,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                drop(state);
                // Already dequeued: a release granted the slot just as the deadline fired.
                pending.settled = true;
                match pending.rx.try_recv() {
                    Ok(()) => Ok(self.permit()),
                    Err(_) => Err(Error::Other("admission ticket lost its grant".into())),
                }
            }
        }
    }

    fn permit(&self) -> GatePermit {
        GatePermit {
            inner: self.inner.clone(),
        }
    }

    /// Jobs currently holding a slot
    pub fn active_count(&self) -> usize {
        self.inner.lock().active
    }

    /// Jobs waiting for a slot
    pub fn queued(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    pub fn queue_timeout(&self) -> Duration {
        self.inner.queue_timeout
    }
}

/// A queued ticket owned by an in-progress `acquire` call.
struct PendingTicket<'a> {
    gate: &'a GateInner,
    ticket: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.gate.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == self.ticket) {
            state.waiters.remove(pos);
            return;
        }
        drop(state);
        // Granted but never observed: hand the slot on.
        if self.rx.try_recv().is_ok() {
            self.gate.release();
        }
    }
}

/// One admission slot. The slot is released exactly once, when the permit drops.
pub struct GatePermit {
    inner: Arc<GateInner>,
}

impl GatePermit {
    /// Give the slot back now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("max_concurrent", &self.inner.max_concurrent)
            .finish()
    }
}
