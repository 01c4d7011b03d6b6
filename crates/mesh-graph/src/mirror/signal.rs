//! Coalesced "changed" signal
//!
//! The worker raises the signal once per processed burst of notifications.
//! The slot holds at most one pending wake-up, so any number of raises
//! between two waits collapse into one.

use flume::{Receiver, Sender};
use std::time::Duration;

/// Raising side, held by the worker
#[derive(Debug, Clone)]
pub(crate) struct ChangeSignal {
    tx: Sender<()>,
}

/// Waiting side, handed to the driving loop
#[derive(Debug, Clone)]
pub struct ChangeListener {
    rx: Receiver<()>,
}

pub(crate) fn change_signal() -> (ChangeSignal, ChangeListener) {
    let (tx, rx) = flume::bounded(1);
    (ChangeSignal { tx }, ChangeListener { rx })
}

impl ChangeSignal {
    pub fn raise(&self) {
        // Full slot means a wake-up is already pending
        let _ = self.tx.try_send(());
    }
}

impl ChangeListener {
    /// Block until the signal is raised or `timeout` passes
    ///
    /// Returns true if the signal was raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending signal without blocking
    pub fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raises_coalesce() {
        let (signal, listener) = change_signal();
        assert!(!listener.take());

        for _ in 0..10 {
            signal.raise();
        }
        assert!(listener.take());
        assert!(!listener.take());
        assert!(!listener.wait(Duration::from_millis(5)));
    }
}
