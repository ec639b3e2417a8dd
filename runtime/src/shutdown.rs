//! Process-wide shutdown signal.
//!
//! One [`ShutdownTrigger`] fans out to any number of [`Shutdown`] listeners.
//! Background loops check [`Shutdown::is_triggered`] between units of work
//! and race [`Shutdown::triggered`] against their suspension points.
//!
//! Dropping the trigger counts as triggering it, so a supervisor that goes
//! away never leaves its tasks running unobserved.

use tokio::sync::watch;

/// Create a connected trigger/listener pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every listener. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// A new listener for this trigger.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving half of the shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until shutdown is requested. Returns immediately if it already was.
    pub async fn triggered(&mut self) {
        // Err means the trigger was dropped, which also ends the wait.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
