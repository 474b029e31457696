//! Ordered per-key dispatcher
//!
//! Jobs submitted under the same key run one at a time in submission order.
//! Each key owns a lock-free FIFO and a work-in-progress counter; the caller
//! that moves the counter off zero spawns the drain worker on the tokio
//! runtime. Nothing here blocks the caller and no thread is parked per key.

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::error::{FleetError, Result};

/// A queued unit of work
pub type Job = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

struct SerialExecutor {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    wip: AtomicUsize,
}

impl SerialExecutor {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            wip: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub keys: usize,
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keys={} executed={} failed={} panicked={}",
            self.keys, self.executed, self.failed, self.panicked
        )
    }
}

pub struct OrderedDispatcher {
    executors: DashMap<String, Arc<SerialExecutor>>,
    handle: Handle,
    counters: Arc<Counters>,
}

impl OrderedDispatcher {
    pub fn new(handle: Handle) -> Self {
        Self {
            executors: DashMap::new(),
            handle,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Bind to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| FleetError::DispatcherUnavailable(e.to_string()))?;
        Ok(Self::new(handle))
    }

    /// Queue `job` behind every earlier job for `key`. Never blocks.
    pub fn dispatch<F>(&self, key: &str, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        // Enqueue under the entry guard so `unregister` sees the new work
        let (executor, start) = {
            let entry = self
                .executors
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(SerialExecutor::new()));

            // The executor owns its receiver, so the channel cannot be disconnected
            let _ = entry.tx.send(Box::pin(job));
            let start = entry.wip.fetch_add(1, Ordering::AcqRel) == 0;
            (Arc::clone(entry.value()), start)
        };

        if start {
            let key = key.to_string();
            let counters = Arc::clone(&self.counters);
            self.handle.spawn(drain(key, executor, counters));
        }
    }

    /// Synchronous variant of [`dispatch`](Self::dispatch).
    pub fn dispatch_fn<F>(&self, key: &str, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.dispatch(key, async move { f() });
    }

    /// Run `job` right away with no ordering guarantee.
    pub fn dispatch_unordered<F>(&self, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        self.handle.spawn(async move {
            run_job("<unordered>", Box::pin(job), &counters).await;
        });
    }

    /// Forget a key's executor once it is idle.
    ///
    /// Returns false when the key is unknown or still has work in flight; the
    /// executor is then kept so later jobs queue behind the running worker.
    pub fn unregister(&self, key: &str) -> bool {
        let removed = self
            .executors
            .remove_if(key, |_, e| e.wip.load(Ordering::Acquire) == 0)
            .is_some();
        if removed {
            debug!(key, "executor unregistered");
        } else if self.executors.contains_key(key) {
            debug!(key, "executor busy, kept");
        }
        removed
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Jobs queued for `key` that have not started yet
    pub fn pending(&self, key: &str) -> usize {
        self.executors.get(key).map(|e| e.rx.len()).unwrap_or(0)
    }

    fn busy(&self) -> bool {
        self.executors
            .iter()
            .any(|e| e.wip.load(Ordering::Acquire) > 0)
    }

    /// Wait until every registered key has drained. Returns false on timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.busy() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        true
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            keys: self.executors.len(),
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Drain loop. `missed` is the number of wake-up signals this worker owns;
/// it exits only when subtracting them brings the counter back to zero.
async fn drain(key: String, executor: Arc<SerialExecutor>, counters: Arc<Counters>) {
    let mut missed = 1;
    loop {
        while let Ok(job) = executor.rx.try_recv() {
            run_job(&key, job, &counters).await;
        }

        let previous = executor.wip.fetch_sub(missed, Ordering::AcqRel);
        missed = previous - missed;
        if missed == 0 {
            break;
        }
    }
}

async fn run_job(key: &str, job: Job, counters: &Counters) {
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(Ok(())) => {
            counters.executed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(key, error = %e, "dispatched job failed");
        }
        Err(payload) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(key, panic = %panic_message(payload.as_ref()), "dispatched job panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    const FLUSH: Duration = Duration::from_secs(5);

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifo_per_key() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=1000u32 {
            let log = Arc::clone(&log);
            dispatcher.dispatch("AGV1", async move {
                // Yield so a second worker would get a chance to interleave
                tokio::task::yield_now().await;
                log.lock().push(n);
                Ok(())
            });
        }

        assert!(dispatcher.flush(FLUSH).await);
        let log = log.lock();
        assert_eq!(log.len(), 1000);
        assert!(log.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(dispatcher.stats().executed, 1000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_job_completes_before_next_starts() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&log);
        dispatcher.dispatch("AGV1", async move {
            a.lock().push("A start");
            tokio::time::sleep(Duration::from_millis(20)).await;
            a.lock().push("A done");
            Ok(())
        });
        let b = Arc::clone(&log);
        dispatcher.dispatch_fn("AGV1", move || {
            b.lock().push("B start");
            Ok(())
        });

        assert!(dispatcher.flush(FLUSH).await);
        assert_eq!(*log.lock(), vec!["A start", "A done", "B start"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_do_not_stall_queue() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        dispatcher.dispatch("AGV1", async { Err(FleetError::Internal("boom".into())) });
        dispatcher.dispatch_fn("AGV1", || panic!("driver crashed"));
        let l = Arc::clone(&log);
        dispatcher.dispatch_fn("AGV1", move || {
            l.lock().push(3);
            Ok(())
        });

        assert!(dispatcher.flush(FLUSH).await);
        assert_eq!(*log.lock(), vec![3]);
        let stats = dispatcher.stats();
        assert_eq!((stats.executed, stats.failed, stats.panicked), (1, 1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keys_do_not_block_each_other() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        // AGV1 waits for a signal only AGV2's job sends
        dispatcher.dispatch("AGV1", async move {
            rx.await
                .map_err(|_| FleetError::Internal("sender dropped".into()))
        });
        dispatcher.dispatch_fn("AGV2", move || {
            let _ = tx.send(());
            Ok(())
        });

        assert!(dispatcher.flush(FLUSH).await);
        assert_eq!(dispatcher.stats().executed, 2);
    }

    #[tokio::test]
    async fn test_unregister_and_introspection() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        dispatcher.dispatch_fn("AGV2", || Ok(()));
        dispatcher.dispatch_fn("AGV1", || Ok(()));
        assert_eq!(dispatcher.active_keys(), vec!["AGV1", "AGV2"]);

        assert!(dispatcher.flush(FLUSH).await);
        assert_eq!(dispatcher.pending("AGV1"), 0);
        assert!(dispatcher.unregister("AGV1"));
        assert!(!dispatcher.unregister("AGV1"));
        assert_eq!(dispatcher.active_keys(), vec!["AGV2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unregister_while_busy_keeps_order() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let old = Arc::clone(&log);
        dispatcher.dispatch("AGV1", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            old.lock().push("old");
            Ok(())
        });
        // Offline while the first job is still running, then back online
        assert!(!dispatcher.unregister("AGV1"));
        let new = Arc::clone(&log);
        dispatcher.dispatch_fn("AGV1", move || {
            new.lock().push("new");
            Ok(())
        });

        assert!(dispatcher.flush(FLUSH).await);
        assert_eq!(*log.lock(), vec!["old", "new"]);
        assert!(dispatcher.unregister("AGV1"));
        assert!(dispatcher.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unordered_runs() {
        let dispatcher = OrderedDispatcher::current().unwrap();
        let (tx, rx) = oneshot::channel();
        dispatcher.dispatch_unordered(async move {
            let _ = tx.send(42);
            Ok(())
        });
        assert_eq!(rx.await.unwrap(), 42);
        assert!(dispatcher.active_keys().is_empty());
    }

    #[test]
    fn test_current_without_runtime() {
        assert!(matches!(
            OrderedDispatcher::current(),
            Err(FleetError::DispatcherUnavailable(_))
        ));
    }
}
