//! One-shot closure signal
//!
//! A link's closure signal fires exactly once, when the link leaves the
//! registry. Any number of waiters can hold a clone and await it; waiters
//! that arrive after the signal fired return immediately.

use std::sync::Arc;

use tokio::sync::watch;

/// Broadcast, fire-once event shared by all clones
#[derive(Debug, Clone)]
pub struct ClosedSignal {
    inner: Arc<watch::Sender<bool>>,
}

impl Default for ClosedSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ClosedSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { inner: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        self.inner.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.inner.borrow()
    }

    /// Wait until the signal fires
    pub async fn wait(&self) {
        let mut rx = self.inner.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Whether two handles refer to the same signal
    pub fn same_as(&self, other: &ClosedSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fires_once() {
        let signal = ClosedSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[tokio::test]
    async fn test_many_waiters_released() {
        let signal = ClosedSignal::new();
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let s = signal.clone();
            waiters.push(tokio::spawn(async move { s.wait().await }));
        }
        tokio::task::yield_now().await;
        signal.fire();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter released")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let signal = ClosedSignal::new();
        signal.fire();
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already fired");
    }

    #[test]
    fn test_identity() {
        let a = ClosedSignal::new();
        let b = a.clone();
        let c = ClosedSignal::new();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
