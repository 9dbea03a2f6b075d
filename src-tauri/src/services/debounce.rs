use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

type Sink<K, V> = Arc<dyn Fn(&K, V) + Send + Sync>;

struct Pending<V> {
    generation: u64,
    value: V,
    handle: JoinHandle<()>,
}

struct Inner<K, V> {
    delay: Duration,
    next_generation: u64,
    pending: HashMap<K, Pending<V>>,
}

/// Coalesces rapid writes per key: only the last value scheduled within the
/// delay window reaches the sink.
///
/// Every schedule gets a fresh generation number. A timer only writes if its
/// generation is still the one registered for the key, so a superseded timer
/// that already woke up cannot write a stale value.
pub struct Debouncer<K, V> {
    sink: Sink<K, V>,
    inner: Arc<Mutex<Inner<K, V>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(delay: Duration, sink: impl Fn(&K, V) + Send + Sync + 'static) -> Self {
        Debouncer {
            sink: Arc::new(sink),
            inner: Arc::new(Mutex::new(Inner {
                delay,
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        lock(&self.inner).delay = delay;
    }

    /// Replaces any pending write for `key` and restarts its timer.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, key: K, value: V) {
        let mut inner = lock(&self.inner);
        inner.next_generation += 1;
        let generation = inner.next_generation;
        if let Some(previous) = inner.pending.remove(&key) {
            previous.handle.abort();
        }

        let shared = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let delay = inner.delay;
        let timer_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut inner = lock(&shared);
                match inner.pending.get(&timer_key) {
                    Some(pending) if pending.generation == generation => {
                        inner.pending.remove(&timer_key).map(|pending| pending.value)
                    }
                    _ => None,
                }
            };
            if let Some(value) = due {
                sink(&timer_key, value);
            }
        });

        inner.pending.insert(
            key,
            Pending {
                generation,
                value,
                handle,
            },
        );
    }

    /// Drops the pending write for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.inner).pending.remove(key) {
            Some(pending) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Writes every pending value now. Returns how many were written.
    pub fn flush(&self) -> usize {
        let drained: Vec<(K, V)> = {
            let mut inner = lock(&self.inner);
            inner
                .pending
                .drain()
                .map(|(key, pending)| {
                    pending.handle.abort();
                    (key, pending.value)
                })
                .collect()
        };

        let written = drained.len();
        for (key, value) in drained {
            (self.sink)(&key, value);
        }
        written
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<(String, f64)>>>;

    fn recording(delay_ms: u64) -> (Debouncer<&'static str, f64>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink_log = Arc::clone(&log);
        let debouncer = Debouncer::new(Duration::from_millis(delay_ms), move |key: &&str, value: f64| {
            sink_log.lock().unwrap().push((key.to_string(), value));
        });
        (debouncer, log)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_last_value_is_written() {
        let (debouncer, log) = recording(1000);
        debouncer.schedule("uc-1", 10.0);
        advance(500).await;
        debouncer.schedule("uc-1", 20.0);
        advance(700).await;
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(debouncer.pending(), 1);

        advance(400).await;
        assert_eq!(*log.lock().unwrap(), vec![("uc-1".to_string(), 20.0)]);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_debounced_independently() {
        let (debouncer, log) = recording(1000);
        debouncer.schedule("uc-1", 1.0);
        advance(600).await;
        debouncer.schedule("uc-2", 2.0);
        advance(500).await;
        assert_eq!(*log.lock().unwrap(), vec![("uc-1".to_string(), 1.0)]);
        advance(600).await;
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_values_immediately() {
        let (debouncer, log) = recording(1000);
        debouncer.schedule("uc-1", 1.0);
        debouncer.schedule("uc-2", 2.0);

        assert_eq!(debouncer.flush(), 2);
        let mut written = log.lock().unwrap().clone();
        written.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(written, vec![("uc-1".to_string(), 1.0), ("uc-2".to_string(), 2.0)]);

        advance(2000).await;
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(debouncer.flush(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_writes_never_happen() {
        let (debouncer, log) = recording(1000);
        debouncer.schedule("uc-1", 1.0);
        assert!(debouncer.cancel(&"uc-1"));
        assert!(!debouncer.cancel(&"uc-1"));
        advance(2000).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_changes_apply_to_new_schedules() {
        let (debouncer, log) = recording(1000);
        debouncer.set_delay(Duration::from_millis(100));
        debouncer.schedule("uc-1", 5.0);
        advance(150).await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
