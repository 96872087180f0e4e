//! Per-move completion correlation
//!
//! Every move gets a fresh ticket. The waiter is registered before the move is
//! issued, so a notification that arrives before `move_joints` returns still
//! finds it. A notification only ever releases the waiter for its own ticket.

use crate::domain::types::MoveTicket;
use crate::io::actuator::NotifyCallback;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug)]
pub struct CompletionRouter {
    next_ticket: AtomicU64,
    waiters: Mutex<FxHashMap<MoveTicket, oneshot::Sender<()>>>,
}

impl Default for CompletionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionRouter {
    pub fn new() -> Self {
        Self { next_ticket: AtomicU64::new(1), waiters: Mutex::new(FxHashMap::default()) }
    }

    pub fn next_ticket(&self) -> MoveTicket {
        MoveTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed))
    }

    /// Register interest in `ticket`; resolves once `notify(ticket)` is called
    pub fn register(&self, ticket: MoveTicket) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(ticket, tx);
        rx
    }

    /// Release the waiter for `ticket`; returns false when nobody is waiting
    pub fn notify(&self, ticket: MoveTicket) -> bool {
        let waiter = self.waiters.lock().remove(&ticket);
        match waiter {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                debug!(ticket = %ticket, "completion_unmatched");
                false
            }
        }
    }

    /// Forget the waiter for `ticket` (move was rejected)
    pub fn cancel(&self, ticket: MoveTicket) {
        self.waiters.lock().remove(&ticket);
    }

    /// Drop every waiter; returns how many were outstanding
    pub fn cancel_all(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    pub fn outstanding(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Notify callback handed to the actuator
    pub fn callback(self: &Arc<Self>) -> NotifyCallback {
        let router = Arc::clone(self);
        Arc::new(move |ticket| {
            router.notify(ticket);
        })
    }
}
