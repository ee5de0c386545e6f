//! Job scheduler (C2).
//!
//! The controller owns two independent instances of this same [`Scheduler`]
//! type — a fast one for jobs whose delay is `<= 1.0s`, a slow one for
//! everything else. Routing between the two is the controller's job (see
//! `Controller::call_later`); the scheduler itself does not care which
//! bucket it represents beyond a name used for tracing.
//!
//! Jobs are kept in a min-heap ordered by due instant, with insertion
//! sequence as the tie-breaker, matching "jobs due at the same instant fire
//! in insertion order".

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::RuntimeFlags;

use crate::pubsub::PubSub;

const TRACING_TARGET: &str = "vaultkeep_runtime::scheduler";

/// Grace period added to a repeating job's next due instant when the
/// process has just woken from sleep and the job opted into
/// `should_delay_on_wakeup`.
pub const WAKE_GRACE: Duration = Duration::from_secs(15);

/// Threshold below which a job's delay routes to the fast scheduler.
pub const FAST_SCHEDULER_THRESHOLD: Duration = Duration::from_millis(1000);

/// One-shot vs repeating job kind.
pub enum JobKind {
    /// Fires once, then is done.
    Once,
    /// Fires, then reschedules at `now + period`.
    Repeating {
        period: Duration,
        /// If true, a reschedule occurring while `just_woke_from_sleep` is
        /// set adds [`WAKE_GRACE`] to the next due instant.
        should_delay_on_wakeup: bool,
        /// If set, the job subscribes to this pubsub topic; receiving it
        /// calls `Wake()`.
        wake_on_topic: Option<String>,
    },
}

struct JobInner {
    name: String,
    seq: u64,
    due_at: Mutex<Instant>,
    kind: JobKind,
    cancelled: AtomicBool,
    callable: Box<dyn Fn() + Send + Sync>,
    scheduler_notify: Arc<Notify>,
}

impl JobInner {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A handle to a job submitted to a [`Scheduler`].
///
/// Cloning shares the same underlying job; cancelling or waking through any
/// clone affects all of them.
#[derive(Clone)]
pub struct ScheduledJob(Arc<JobInner>);

impl ScheduledJob {
    /// Marks the job cancelled. The scheduler discards it the next time it
    /// is popped, rather than searching the heap for it.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.scheduler_notify.notify_one();
    }

    /// Moves the job's due instant to now and wakes the scheduler.
    pub fn wake(&self) {
        *self.0.due_at.lock().expect("job due_at mutex poisoned") = Instant::now();
        self.0.scheduler_notify.notify_one();
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

struct HeapEntry {
    due_at: Instant,
    seq: u64,
    job: Arc<JobInner>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due_at, self.seq).cmp(&(other.due_at, other.seq))
    }
}

/// A snapshot of one pending job, for diagnostics
/// (`Controller::debug_scheduled_jobs`).
#[derive(Debug, Clone)]
pub struct ScheduledJobSnapshot {
    pub name: String,
    pub due_in: Duration,
    pub kind: &'static str,
}

/// A priority-queue job scheduler with a dedicated driver task.
pub struct Scheduler {
    name: &'static str,
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    notify: Arc<Notify>,
    next_seq: AtomicU64,
    cancel: CancellationToken,
    bus: Arc<PubSub>,
    flags: Arc<RuntimeFlags>,
}

impl Scheduler {
    pub fn new(name: &'static str, bus: Arc<PubSub>, flags: Arc<RuntimeFlags>) -> Arc<Self> {
        Arc::new(Self {
            name,
            heap: Mutex::new(BinaryHeap::new()),
            notify: Arc::new(Notify::new()),
            next_seq: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            bus,
            flags,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts a new job due `delay` from now and wakes the scheduler.
    pub fn add_job(
        &self,
        name: impl Into<String>,
        delay: Duration,
        kind: JobKind,
        callable: impl Fn() + Send + Sync + 'static,
    ) -> ScheduledJob {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let due_at = Instant::now() + delay;
        let inner = Arc::new(JobInner {
            name: name.into(),
            seq,
            due_at: Mutex::new(due_at),
            kind,
            cancelled: AtomicBool::new(false),
            callable: Box::new(callable),
            scheduler_notify: self.notify.clone(),
        });

        if let JobKind::Repeating { wake_on_topic: Some(topic), .. } = &inner.kind {
            let job_for_topic = inner.clone();
            self.bus.sub(
                topic.clone(),
                Box::new(move |_payload| {
                    ScheduledJob(job_for_topic.clone()).wake();
                    Ok(())
                }),
            );
        }

        self.heap.lock().expect("scheduler heap mutex poisoned").push(Reverse(HeapEntry {
            due_at,
            seq,
            job: inner.clone(),
        }));
        self.notify.notify_one();
        ScheduledJob(inner)
    }

    /// Reaps cancelled entries from the heap (`ClearOutDead`).
    pub fn clear_out_dead(&self) {
        let mut heap = self.heap.lock().expect("scheduler heap mutex poisoned");
        let mut keep = BinaryHeap::with_capacity(heap.len());
        while let Some(Reverse(entry)) = heap.pop() {
            if !entry.job.is_cancelled() {
                keep.push(Reverse(entry));
            }
        }
        *heap = keep;
    }

    /// Returns a diagnostic snapshot of all pending (non-cancelled) jobs.
    pub fn debug_snapshot(&self) -> Vec<ScheduledJobSnapshot> {
        let now = Instant::now();
        self.heap
            .lock()
            .expect("scheduler heap mutex poisoned")
            .iter()
            .filter(|Reverse(entry)| !entry.job.is_cancelled())
            .map(|Reverse(entry)| ScheduledJobSnapshot {
                name: entry.job.name.clone(),
                due_in: entry.due_at.saturating_duration_since(now),
                kind: match entry.job.kind {
                    JobKind::Once => "once",
                    JobKind::Repeating { .. } => "repeating",
                },
            })
            .collect()
    }

    fn pop_ready_jobs(&self) -> Vec<Arc<JobInner>> {
        let mut ready = Vec::new();
        let mut heap = self.heap.lock().expect("scheduler heap mutex poisoned");
        let now = Instant::now();
        loop {
            let is_ready = matches!(heap.peek(), Some(Reverse(entry)) if entry.due_at <= now);
            if !is_ready {
                break;
            }
            let Reverse(entry) = heap.pop().expect("peeked entry must exist");
            if entry.job.is_cancelled() {
                continue;
            }
            let current_due = *entry.job.due_at.lock().expect("job due_at mutex poisoned");
            if current_due != entry.due_at {
                // Job was woken (or otherwise rescheduled) after this entry
                // was pushed; reinsert with the up-to-date due instant
                // rather than running it early.
                heap.push(Reverse(HeapEntry { due_at: current_due, seq: entry.seq, job: entry.job }));
                continue;
            }
            ready.push(entry.job);
        }
        ready
    }

    fn reschedule_if_repeating(&self, job: Arc<JobInner>) {
        let JobKind::Repeating { period, should_delay_on_wakeup, .. } = &job.kind else {
            return;
        };
        if job.is_cancelled() {
            return;
        }
        let extra = if *should_delay_on_wakeup && self.flags.just_woke_from_sleep() {
            WAKE_GRACE
        } else {
            Duration::ZERO
        };
        let due_at = Instant::now() + *period + extra;
        *job.due_at.lock().expect("job due_at mutex poisoned") = due_at;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.heap.lock().expect("scheduler heap mutex poisoned").push(Reverse(HeapEntry { due_at, seq, job }));
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.heap.lock().expect("scheduler heap mutex poisoned").peek().map(|Reverse(entry)| entry.due_at)
    }

    async fn tick(self: &Arc<Self>) {
        for job in self.pop_ready_jobs() {
            tracing::debug!(
                target: TRACING_TARGET,
                scheduler = self.name,
                job = %job.name,
                "running scheduled job"
            );
            (job.callable)();
            self.reschedule_if_repeating(job);
        }
    }

    /// Spawns the driver task that waits for the next due job (or a wakeup
    /// signal from `AddJob`/`Wake`/`Cancel`) and runs whatever is ready.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let sleep_until_next = async {
                    match self.next_wakeup() {
                        Some(instant) => tokio::time::sleep_until(instant).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        tracing::info!(target: TRACING_TARGET, scheduler = self.name, "scheduler stopping");
                        break;
                    }
                    () = self.notify.notified() => {}
                    () = sleep_until_next => {}
                }

                self.tick().await;
            }
        })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn scheduler(name: &'static str) -> Arc<Scheduler> {
        let flags = Arc::new(RuntimeFlags::new());
        let bus = PubSub::new(flags.clone());
        Scheduler::new(name, bus, flags)
    }

    #[tokio::test]
    async fn jobs_run_in_due_time_order() {
        let sched = scheduler("fast");
        let order = Arc::new(StdMutex::new(Vec::new()));
        let handle = sched.clone().spawn();

        let order_a = order.clone();
        sched.add_job("a", Duration::from_millis(10), JobKind::Once, move || {
            order_a.lock().unwrap().push("a");
        });
        let order_b = order.clone();
        sched.add_job("b", Duration::from_millis(60), JobKind::Once, move || {
            order_b.lock().unwrap().push("b");
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        sched.stop();
        let _ = handle.await;

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancel_before_due_prevents_execution() {
        let sched = scheduler("fast");
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.clone().spawn();

        let hits_clone = hits.clone();
        let job = sched.add_job("cancel-me", Duration::from_millis(40), JobKind::Once, move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        job.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        sched.stop();
        let _ = handle.await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wake_fires_immediately_and_reschedules() {
        let sched = scheduler("fast");
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.clone().spawn();

        let hits_clone = hits.clone();
        let job = sched.add_job(
            "repeating",
            Duration::from_secs(60),
            JobKind::Repeating {
                period: Duration::from_secs(60),
                should_delay_on_wakeup: false,
                wake_on_topic: None,
            },
            move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        job.wake();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sched.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn wake_on_pubsub_topic_triggers_job() {
        let flags = Arc::new(RuntimeFlags::new());
        let bus = PubSub::new(flags.clone());
        let sched = Scheduler::new("fast", bus.clone(), flags);
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = sched.clone().spawn();

        let hits_clone = hits.clone();
        sched.add_job(
            "pingable",
            Duration::from_secs(60),
            JobKind::Repeating {
                period: Duration::from_secs(60),
                should_delay_on_wakeup: false,
                wake_on_topic: Some("ping".to_string()),
            },
            move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            },
        );

        for _ in 0..3 {
            bus.pub_immediate("ping", serde_json::json!({}));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(hits.load(Ordering::SeqCst) >= 3);
        sched.stop();
        let _ = handle.await;
    }

    #[test]
    fn clear_out_dead_removes_cancelled_entries() {
        let sched = scheduler("slow");
        let job = sched.add_job("will-cancel", Duration::from_secs(5), JobKind::Once, || {});
        job.cancel();
        assert_eq!(sched.debug_snapshot().len(), 0);
        sched.clear_out_dead();
        assert!(sched.heap.lock().unwrap().is_empty());
    }
}
