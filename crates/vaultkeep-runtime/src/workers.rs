//! Worker pools (C3).
//!
//! Two pools live on the controller: a soft-capped short-task pool and an
//! uncapped long-running pool. Both expose the same `call` API
//! (`CallToThread`/`CallToThreadLongRunning`); the difference is entirely
//! in the dispatch policy and cap.
//!
//! A worker is a single-slot mailbox task: `put` delivers one callable, the
//! worker runs it via [`tokio::task::spawn_blocking`] (so CPU-bound work
//! never starves the async executor) and then waits for the next one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;

const TRACING_TARGET: &str = "vaultkeep_runtime::workers";

/// Soft cap for the short-task pool.
pub const SHORT_TASK_POOL_CAP: usize = 200;

/// How often `ThreadPoolBusyStatus` is allowed to recompute.
pub const BUSY_STATUS_CACHE_TTL: Duration = Duration::from_secs(10);

type Job = Box<dyn FnOnce() + Send + 'static>;

tokio::task_local! {
    static IN_POOL_WORKER: bool;
}

fn caller_is_pool_worker() -> bool {
    IN_POOL_WORKER.try_with(|value| *value).unwrap_or(false)
}

struct WorkerHandle {
    id: u64,
    tx: mpsc::Sender<Job>,
    working: Arc<AtomicBool>,
}

async fn run_worker(id: u64, mut rx: mpsc::Receiver<Job>, working: Arc<AtomicBool>, pool_name: &'static str) {
    IN_POOL_WORKER
        .scope(true, async move {
            while let Some(job) = rx.recv().await {
                working.store(true, Ordering::SeqCst);
                if tokio::task::spawn_blocking(job).await.is_err() {
                    tracing::error!(
                        target: TRACING_TARGET,
                        pool = pool_name,
                        worker = id,
                        "worker task panicked"
                    );
                }
                working.store(false, Ordering::SeqCst);
            }
            tracing::debug!(target: TRACING_TARGET, pool = pool_name, worker = id, "worker reaped");
        })
        .await;
}

/// A coarse health readout of the short-task pool, recomputed at most once
/// per [`BUSY_STATUS_CACHE_TTL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyStatus {
    Idle,
    Working,
    Busy,
    VeryBusy,
}

impl BusyStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Working => "working",
            Self::Busy => "busy",
            Self::VeryBusy => "very busy!",
        }
    }

    fn from_working_count(count: usize) -> Self {
        match count {
            0..=3 => Self::Idle,
            4..=9 => Self::Working,
            10..=19 => Self::Busy,
            _ => Self::VeryBusy,
        }
    }
}

/// A diagnostic snapshot of one worker (`GetThreadsSnapshot`).
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: u64,
    pub working: bool,
}

/// A pool of reusable worker tasks with dynamic spawn/reap.
pub struct WorkerPool {
    name: &'static str,
    soft_cap: Option<usize>,
    always_spawn: bool,
    workers: Mutex<Vec<Arc<WorkerHandle>>>,
    next_id: AtomicU64,
    busy_cache: RwLock<(Instant, BusyStatus)>,
}

impl WorkerPool {
    /// Soft-capped at [`SHORT_TASK_POOL_CAP`]; reuses an idle worker when
    /// one is available, spawns a new one below cap, otherwise queues
    /// behind a randomly-chosen worker.
    pub fn new_short_task(name: &'static str) -> Arc<Self> {
        Self::build(name, Some(SHORT_TASK_POOL_CAP), false)
    }

    /// Unbounded; always spawns a fresh worker so long jobs never queue
    /// behind one another.
    pub fn new_long_running(name: &'static str) -> Arc<Self> {
        Self::build(name, None, true)
    }

    fn build(name: &'static str, soft_cap: Option<usize>, always_spawn: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            soft_cap,
            always_spawn,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            busy_cache: RwLock::new((Instant::now() - BUSY_STATUS_CACHE_TTL, BusyStatus::Idle)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of workers currently alive in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.lock().expect("worker pool mutex poisoned").len()
    }

    fn spawn_worker(self: &Arc<Self>) -> Arc<WorkerHandle> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        let working = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(WorkerHandle { id, tx, working: working.clone() });
        let pool_name = self.name;
        tokio::spawn(run_worker(id, rx, working, pool_name));
        self.workers.lock().expect("worker pool mutex poisoned").push(handle.clone());
        handle
    }

    /// Dispatches `f` to this pool (`_GetCallToThread`'s policy): reuse an
    /// idle worker if one exists; otherwise spawn below cap (or
    /// unconditionally for the long-running pool, or when the caller is
    /// itself a pool worker, to avoid deadlocking on itself); otherwise
    /// queue behind a worker chosen uniformly at random.
    pub fn call(self: &Arc<Self>, f: impl FnOnce() + Send + 'static) {
        let idle = {
            let workers = self.workers.lock().expect("worker pool mutex poisoned");
            workers.iter().find(|w| !w.working.load(Ordering::SeqCst)).cloned()
        };

        if let Some(worker) = idle {
            if worker.tx.try_send(Box::new(f) as Job).is_ok() {
                return;
            }
            // Lost the race with another caller; fall through to spawn/queue.
        }

        let at_cap = self.soft_cap.is_some_and(|cap| self.worker_count() >= cap);
        if self.always_spawn || !at_cap || caller_is_pool_worker() {
            let worker = self.spawn_worker();
            let _ = worker.tx.try_send(Box::new(f) as Job);
            return;
        }

        let chosen = {
            let workers = self.workers.lock().expect("worker pool mutex poisoned");
            let index = rand::rng().random_range(0..workers.len());
            workers[index].clone()
        };
        let tx = chosen.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Box::new(f) as Job).await;
        });
    }

    /// Computes (or returns the cached) busy status.
    pub async fn busy_status(&self) -> BusyStatus {
        {
            let cache = self.busy_cache.read().await;
            if Instant::now().saturating_duration_since(cache.0) < BUSY_STATUS_CACHE_TTL {
                return cache.1;
            }
        }
        let working = self
            .workers
            .lock()
            .expect("worker pool mutex poisoned")
            .iter()
            .filter(|w| w.working.load(Ordering::SeqCst))
            .count();
        let status = BusyStatus::from_working_count(working);
        *self.busy_cache.write().await = (Instant::now(), status);
        status
    }

    /// Diagnostic enumeration of live workers (`GetThreadsSnapshot`).
    pub fn threads_snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .expect("worker pool mutex poisoned")
            .iter()
            .map(|w| WorkerSnapshot { id: w.id, working: w.working.load(Ordering::SeqCst) })
            .collect()
    }

    /// Drops the handles of every currently-idle worker, letting their
    /// tasks end naturally once the sender side of their mailbox closes.
    pub fn reap_idle(&self) {
        let mut workers = self.workers.lock().expect("worker pool mutex poisoned");
        workers.retain(|w| w.working.load(Ordering::SeqCst));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn call_runs_the_callable() {
        let pool = WorkerPool::new_short_task("short");
        let hits = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        let hits_clone = hits.clone();
        let done_clone = done.clone();
        pool.call(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            done_clone.notify_one();
        });

        done.notified().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn long_running_pool_always_spawns() {
        let pool = WorkerPool::new_long_running("long");
        let barrier = Arc::new(tokio::sync::Barrier::new(3));

        for _ in 0..2 {
            let barrier = barrier.clone();
            pool.call(move || {
                // spawn_blocking context: block on the barrier synchronously
                // via a tiny local runtime handle is unnecessary here; just
                // spin-wait briefly so both workers overlap.
                std::thread::sleep(Duration::from_millis(50));
                let _ = barrier;
            });
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn busy_status_buckets_by_working_count() {
        let pool = WorkerPool::new_short_task("short");
        assert_eq!(pool.busy_status().await, BusyStatus::Idle);
    }

    #[tokio::test]
    async fn reap_idle_drops_non_working_workers() {
        let pool = WorkerPool::new_short_task("short");
        let done = Arc::new(Notify::new());
        let done_clone = done.clone();
        pool.call(move || {
            done_clone.notify_one();
        });
        done.notified().await;
        // Give the worker a moment to flip back to idle after finishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.worker_count(), 1);
        pool.reap_idle();
        assert_eq!(pool.worker_count(), 0);
    }
}
