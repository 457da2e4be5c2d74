//! Coalesce bursts of change notifications
//!
//! [`Debouncer::schedule`] stores the latest payload for a key and restarts the
//! quiet-period timer. When the timer runs out the handler gets the latest
//! payload once. A key never has two handler runs at the same time: a timer
//! that runs out while the handler is busy queues one more run, which starts
//! as soon as the current one returns and uses whatever payload is newest then.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Handler<K, P> = Arc<dyn Fn(K, P) -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot<P> {
    payload: Option<P>,
    generation: u64,
    running: bool,
    run_again: bool,
}

impl<P> Slot<P> {
    fn new() -> Self {
        Self {
            payload: None,
            generation: 0,
            running: false,
            run_again: false,
        }
    }
}

struct Inner<K, P> {
    quiet: Duration,
    handler: Handler<K, P>,
    slots: Mutex<HashMap<K, Slot<P>>>,
}

impl<K, P> Inner<K, P> {
    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<P>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-key debouncer driving an async handler on the tokio runtime
pub struct Debouncer<K, P> {
    inner: Arc<Inner<K, P>>,
}

impl<K, P> Clone for Debouncer<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> Debouncer<K, P>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
    P: Send + 'static,
{
    pub fn new<F, Fut>(quiet: Duration, handler: F) -> Self
    where
        F: Fn(K, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<K, P> = Arc::new(move |key, payload| Box::pin(handler(key, payload)));
        Self {
            inner: Arc::new(Inner {
                quiet,
                handler,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.inner.quiet
    }

    /// Record `payload` as the newest for `key` and restart its timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: K, payload: P) {
        let generation = {
            let mut slots = self.inner.slots();
            let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
            slot.payload = Some(payload);
            slot.generation = slot.generation.wrapping_add(1);
            slot.generation
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.quiet).await;
            Self::elapsed(inner, key, generation).await;
        });
    }

    async fn elapsed(inner: Arc<Inner<K, P>>, key: K, generation: u64) {
        let mut payload = {
            let mut slots = inner.slots();
            let Some(slot) = slots.get_mut(&key) else {
                return;
            };
            if slot.generation != generation {
                // a later schedule restarted the timer
                return;
            }
            if slot.running {
                slot.run_again = true;
                return;
            }
            let Some(payload) = slot.payload.take() else {
                return;
            };
            slot.running = true;
            payload
        };

        loop {
            let run = tokio::spawn((inner.handler)(key.clone(), payload));
            if let Err(e) = run.await {
                tracing::error!("Debounced handler for {:?} failed: {}", key, e);
            }

            let next = {
                let mut slots = inner.slots();
                let Some(slot) = slots.get_mut(&key) else {
                    return;
                };
                let next = if slot.run_again {
                    slot.run_again = false;
                    slot.payload.take()
                } else {
                    None
                };
                if next.is_none() {
                    slot.running = false;
                }
                next
            };

            match next {
                Some(next) => payload = next,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(
        work: Duration,
    ) -> (
        Debouncer<(), u32>,
        Arc<Mutex<Vec<u32>>>,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let max_running = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let debouncer = {
            let calls = Arc::clone(&calls);
            let max_running = Arc::clone(&max_running);
            Debouncer::new(Duration::from_millis(2000), move |_: (), payload: u32| {
                let calls = Arc::clone(&calls);
                let max_running = Arc::clone(&max_running);
                let running = Arc::clone(&running);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(work).await;
                    calls.lock().unwrap().push(payload);
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
        };

        (debouncer, calls, max_running)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_once_with_latest_payload() {
        let (debouncer, calls, _) = recorder(Duration::ZERO);

        for payload in 1..=5 {
            debouncer.schedule((), payload);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_millis(5000)).await;

        assert_eq!(*calls.lock().unwrap(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_run_separately() {
        let (debouncer, calls, _) = recorder(Duration::ZERO);

        debouncer.schedule((), 1);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        debouncer.schedule((), 2);
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(*calls.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_while_running_queues_one_more_run() {
        let (debouncer, calls, max_running) = recorder(Duration::from_millis(5000));

        debouncer.schedule((), 1);
        // first run starts at 2s and lasts until 7s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        debouncer.schedule((), 2);
        tokio::time::sleep(Duration::from_millis(500)).await;
        debouncer.schedule((), 3);
        // timer for 3 runs out at 5s while 1 is still running
        tokio::time::sleep(Duration::from_millis(20000)).await;

        assert_eq!(*calls.lock().unwrap(), vec![1, 3]);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let debouncer = {
            let calls = Arc::clone(&calls);
            Debouncer::new(Duration::from_millis(100), move |key: &'static str, payload: u32| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.lock().unwrap().push((key, payload));
                }
            })
        };

        debouncer.schedule("a", 1);
        debouncer.schedule("b", 2);
        debouncer.schedule("a", 3);
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut seen = calls.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![("a", 3), ("b", 2)]);
    }
}
