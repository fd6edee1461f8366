//! Per-key call coalescing.
//!
//! Wraps async work with a routing key. Calls sharing a key collapse so that
//! only the last call issued before a quiet window elapses actually runs;
//! earlier same-key calls are discarded entirely, not queued. Distinct keys
//! are independent and never block each other.
//!
//! This is pure coalescing, not rate limiting: a steady stream of same-key
//! calls inside the window produces exactly one execution, carrying the last
//! call's work.
//!
//! Implementation is an explicit key → task-handle map with
//! cancel-and-replace semantics, so [`cancel_all`](KeyedDebouncer::cancel_all)
//! can tear every pending timer down deterministically on session reset.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct KeyedDebouncer {
    window: Duration,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl KeyedDebouncer {
    pub fn new(window: Duration) -> Self {
        KeyedDebouncer {
            window,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule `task` to run after the quiet window, superseding any pending
    /// task with the same key.
    ///
    /// Must be called from within a tokio runtime.
    pub fn call<Fut>(&self, key: &str, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.remove(key) {
            previous.abort();
        }
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            task.await;
        });
        tasks.insert(key.to_string(), handle);
    }

    /// Abort every pending task and forget the keys.
    pub fn cancel_all(&self) {
        let mut tasks = self.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Number of tasks still waiting on their window.
    pub fn pending(&self) -> usize {
        self.tasks.lock().values().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for KeyedDebouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_millis(40);

    fn recorded_call(
        debouncer: &KeyedDebouncer,
        key: &str,
        log: &Arc<Mutex<Vec<String>>>,
        payload: &str,
    ) {
        let log = log.clone();
        let payload = payload.to_string();
        debouncer.call(key, async move {
            log.lock().push(payload);
        });
    }

    #[tokio::test]
    async fn test_same_key_collapses_to_last_call() {
        let debouncer = KeyedDebouncer::new(WINDOW);
        let log = Arc::new(Mutex::new(Vec::new()));

        recorded_call(&debouncer, "promo", &log, "first");
        recorded_call(&debouncer, "promo", &log, "second");
        recorded_call(&debouncer, "promo", &log, "third");

        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(*log.lock(), vec!["third".to_string()]);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let debouncer = KeyedDebouncer::new(WINDOW);
        let log = Arc::new(Mutex::new(Vec::new()));

        // A, B, A inside the window: one call for A (last payload), one for B
        recorded_call(&debouncer, "a", &log, "a1");
        recorded_call(&debouncer, "b", &log, "b1");
        recorded_call(&debouncer, "a", &log, "a2");

        tokio::time::sleep(WINDOW * 3).await;
        let mut executed = log.lock().clone();
        executed.sort();
        assert_eq!(executed, vec!["a2".to_string(), "b1".to_string()]);
    }

    #[tokio::test]
    async fn test_new_call_restarts_quiet_window() {
        let debouncer = KeyedDebouncer::new(WINDOW);
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        debouncer.call("k", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Re-issue just before the window elapses; the first must never fire.
        tokio::time::sleep(WINDOW / 2).await;
        let c = counter.clone();
        debouncer.call("k", async move {
            c.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(WINDOW / 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_cancel_all_discards_pending() {
        let debouncer = KeyedDebouncer::new(WINDOW);
        let counter = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            let c = counter.clone();
            debouncer.call(key, async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(debouncer.pending(), 3);

        debouncer.cancel_all();
        tokio::time::sleep(WINDOW * 3).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test]
    async fn test_key_reusable_after_execution() {
        let debouncer = KeyedDebouncer::new(Duration::from_millis(10));
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        debouncer.call("k", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let c = counter.clone();
        debouncer.call("k", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
