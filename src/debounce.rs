//! Single-slot timers keyed by document.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Each `schedule` replaces any timer still pending for the same key, so only
/// the latest request fires. Fired keys arrive on the receiver returned by
/// [`Debouncer::new`].
#[derive(Debug)]
pub struct Debouncer<K> {
    delay: Duration,
    pending: HashMap<K, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<K>,
}

impl<K> Debouncer<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<K>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            delay,
            pending: HashMap::new(),
            tx,
        };
        (debouncer, rx)
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, key: K) {
        self.cancel(&key);
        let tx = self.tx.clone();
        let delay = self.delay;
        let fired = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });
        self.pending.insert(key, handle);
    }

    /// Returns true if a pending timer was aborted.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Forget the bookkeeping for a key whose timer has fired.
    pub fn fired(&mut self, key: &K) {
        if self.pending.get(key).is_some_and(JoinHandle::is_finished) {
            self.pending.remove(key);
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn only_latest_request_fires() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(500));
        debouncer.schedule("doc");
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.schedule("doc");
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err(), "first timer must have been superseded");

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(rx.recv().await, Some("doc"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule("a");
        debouncer.schedule("b");
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut fired = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        fired.sort();
        assert_eq!(fired, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (mut debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule("a");
        assert!(debouncer.cancel(&"a"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert!(!debouncer.cancel(&"a"));
    }
}
