//! Send rendezvous: a single-slot waiter cancellable by a competing
//! waiter, plus a latch so a click with nobody waiting is not lost.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

pub struct SendRendezvous {
    /// At most one waiter; the ticket distinguishes it from a successor so
    /// a timed-out wait never tears down a newer waiter.
    waiter: Mutex<Option<(u64, oneshot::Sender<bool>)>>,
    ticket: AtomicU64,
    /// Set when a send arrives with no waiter installed.
    latch: AtomicBool,
    /// One-shot flag for `consume_sent_state`.
    sent_seen: AtomicBool,
}

impl Default for SendRendezvous {
    fn default() -> Self {
        Self {
            waiter: Mutex::new(None),
            ticket: AtomicU64::new(0),
            latch: AtomicBool::new(false),
            sent_seen: AtomicBool::new(false),
        }
    }
}

impl SendRendezvous {
    /// Wait for a user send. Resolves `true` immediately when a send was
    /// latched earlier; otherwise installs this caller as the sole waiter
    /// (cancelling any previous one, which resolves `false`) and resolves
    /// on the first of send / timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.latch.swap(false, Ordering::SeqCst) {
            return true;
        }

        let ticket = self.ticket.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let previous = self.waiter.lock().unwrap().replace((ticket, tx));
        if let Some((_, prev_tx)) = previous {
            let _ = prev_tx.send(false);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(triggered)) => triggered,
            Ok(Err(_)) => false,
            Err(_) => {
                let mut slot = self.waiter.lock().unwrap();
                if matches!(&*slot, Some((t, _)) if *t == ticket) {
                    slot.take();
                }
                false
            }
        }
    }

    /// A user clicked Send. Resolves the active waiter or latches for the
    /// next one; always marks the sent-seen flag.
    pub fn fire(&self) {
        self.sent_seen.store(true, Ordering::SeqCst);
        let waiter = self.waiter.lock().unwrap().take();
        match waiter {
            Some((_, tx)) => {
                let _ = tx.send(true);
            }
            None => self.latch.store(true, Ordering::SeqCst),
        }
    }

    /// True exactly once after each send.
    pub fn consume_sent_state(&self) -> bool {
        self.sent_seen.swap(false, Ordering::SeqCst)
    }
}
