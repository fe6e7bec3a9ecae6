//! WorkSignal: "something changed, sweep again".
//!
//! A generation counter on a `watch` channel. Any number of poll loops can
//! wait on it; a bump wakes all of them and bumps that happen while nobody is
//! waiting are not lost (the waiter compares generations).

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct WorkSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for WorkSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> WorkWaiter {
        WorkWaiter { rx: self.tx.subscribe() }
    }
}

/// One listener. Each waiter sees every bump at most once.
pub struct WorkWaiter {
    rx: watch::Receiver<u64>,
}

impl WorkWaiter {
    /// Resolves once the generation moved past the last one seen.
    pub async fn changed(&mut self) {
        // The sender lives as long as any WorkSignal clone; if all are gone,
        // nobody can bump anymore and waiting forever is correct.
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
