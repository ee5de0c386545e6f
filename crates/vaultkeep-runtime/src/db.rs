//! Database request pipe (C4).
//!
//! The storage engine is an opaque black box behind [`DbEngine`]; this
//! module only owns the serialising pipe in front of it. A single worker
//! task processes requests strictly in arrival order ("the controller does
//! not reorder"), so two writes issued back-to-back are guaranteed to land
//! in that order even though `Write` itself does not block the caller.
//!
//! `GetResult` in the original is a manual sleep-poll loop; here it is a
//! `oneshot` channel await, which is the idiomatic equivalent and avoids
//! the busy-wait entirely while preserving the same `ShutdownError`
//! semantics (a dropped sender, because the model shut down mid-request,
//! surfaces as [`ErrorKind::Shutdown`]).

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::RuntimeFlags;

use crate::error::{Error, Result};

const TRACING_TARGET: &str = "vaultkeep_runtime::db";

/// Opaque request/response payloads. The concrete storage engine decides
/// how to interpret `action` and the value; the pipe only moves them.
pub type DbArgs = serde_json::Value;
pub type DbValue = serde_json::Value;

/// The black-box storage engine boundary. A concrete implementation (e.g.
/// `vaultkeep-postgres`) is supplied by a [`DbFactory`] and owned by the
/// pipe for the lifetime of the process.
pub trait DbEngine: Send + Sync + 'static {
    /// Performs a read action and returns its result.
    fn read(&self, action: &str, args: DbArgs) -> impl Future<Output = Result<DbValue>> + Send;

    /// Performs a write action and returns its result.
    fn write(&self, action: &str, args: DbArgs) -> impl Future<Output = Result<DbValue>> + Send;
}

/// Builds a concrete [`DbEngine`] for a given database directory. Injected
/// at controller construction time so the controller itself never depends
/// on a concrete storage engine crate.
pub trait DbFactory: Send + Sync + 'static {
    type Engine: DbEngine;

    fn build(&self, db_dir: &std::path::Path) -> Result<Self::Engine>;
}

enum RequestKind {
    Read,
    Write,
    WriteSynchronous,
}

struct DbRequestMessage {
    kind: RequestKind,
    action: String,
    args: DbArgs,
    result_tx: Option<oneshot::Sender<Result<DbValue>>>,
}

/// Front end to the serialising database pipe, exposing the Controller's
/// `Read`/`Write`/`WriteSynchronous` surface.
pub struct DbPipe {
    tx: mpsc::UnboundedSender<DbRequestMessage>,
    pending: Arc<AtomicUsize>,
    doing_job: Arc<AtomicBool>,
    flags: Arc<RuntimeFlags>,
    cancel: CancellationToken,
}

impl DbPipe {
    /// Spawns the single worker task wrapping `engine` and returns the pipe
    /// front-end plus its join handle.
    pub fn spawn<E: DbEngine>(engine: E, flags: Arc<RuntimeFlags>) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let doing_job = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let pipe = Arc::new(Self {
            tx,
            pending: pending.clone(),
            doing_job: doing_job.clone(),
            flags: flags.clone(),
            cancel: cancel.clone(),
        });

        let handle = tokio::spawn(Self::run(engine, rx, pending, doing_job, cancel));
        (pipe, handle)
    }

    async fn run<E: DbEngine>(
        engine: E,
        mut rx: mpsc::UnboundedReceiver<DbRequestMessage>,
        pending: Arc<AtomicUsize>,
        doing_job: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = rx.recv() => next,
            };
            let Some(request) = next else { break };

            doing_job.store(true, Ordering::SeqCst);
            let result = match request.kind {
                RequestKind::Read => engine.read(&request.action, request.args).await,
                RequestKind::Write | RequestKind::WriteSynchronous => {
                    engine.write(&request.action, request.args).await
                }
            };
            doing_job.store(false, Ordering::SeqCst);
            pending.fetch_sub(1, Ordering::SeqCst);

            if let Some(tx) = request.result_tx {
                let _ = tx.send(result);
            }
        }

        // Drain anything still queued, reporting shutdown rather than
        // leaving callers waiting forever on a dropped oneshot.
        while let Ok(request) = rx.try_recv() {
            pending.fetch_sub(1, Ordering::SeqCst);
            if let Some(tx) = request.result_tx {
                let _ = tx.send(Err(Error::shutdown("model shut down before request was served")));
            }
        }

        tracing::info!(target: TRACING_TARGET, "db pipe worker stopped");
    }

    fn enqueue(&self, kind: RequestKind, action: String, args: DbArgs, result_tx: Option<oneshot::Sender<Result<DbValue>>>) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(DbRequestMessage { kind, action, args, result_tx })
            .map_err(|_| Error::shutdown("db pipe is closed"))
    }

    /// Synchronous read: awaits the result.
    pub async fn read(&self, action: impl Into<String>, args: DbArgs) -> Result<DbValue> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RequestKind::Read, action.into(), args, Some(tx))?;
        rx.await.map_err(|_| Error::shutdown("db pipe dropped the result channel"))?
    }

    /// Asynchronous fire-and-forget write.
    pub fn write(&self, action: impl Into<String>, args: DbArgs) {
        let _ = self.enqueue(RequestKind::Write, action.into(), args, None);
    }

    /// Write that blocks for completion.
    pub async fn write_synchronous(&self, action: impl Into<String>, args: DbArgs) -> Result<DbValue> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(RequestKind::WriteSynchronous, action.into(), args, Some(tx))?;
        rx.await.map_err(|_| Error::shutdown("db pipe dropped the result channel"))?
    }

    pub fn db_currently_doing_job(&self) -> bool {
        self.doing_job.load(Ordering::SeqCst)
    }

    pub fn jobs_queue_empty(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Blocks until the queue is empty and no job is in flight, the model
    /// shuts down, or `timeout` elapses (`WaitUntilDBEmpty`'s unspecified
    /// max timeout: recommended default of 10s per the Open Questions).
    pub async fn wait_until_empty(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.jobs_queue_empty() && !self.db_currently_doing_job() {
                return Ok(());
            }
            if self.flags.model_is_shutdown() {
                return Err(Error::shutdown("model shut down while waiting for db pipe to drain"));
            }
            if Instant::now() >= deadline {
                return Err(Error::shutdown("timed out waiting for db pipe to drain"));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stops the worker task; anything still queued is resolved with
    /// [`ErrorKind::Shutdown`](vaultkeep_core::ErrorKind::Shutdown).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Default timeout recommended for [`DbPipe::wait_until_empty`].
pub const DEFAULT_WAIT_UNTIL_DB_EMPTY_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingEngine {
        writes: Arc<AtomicU32>,
    }

    impl DbEngine for CountingEngine {
        async fn read(&self, action: &str, args: DbArgs) -> Result<DbValue> {
            Ok(serde_json::json!({ "echo": action, "args": args }))
        }

        async fn write(&self, _action: &str, _args: DbArgs) -> Result<DbValue> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!(null))
        }
    }

    fn flags() -> Arc<RuntimeFlags> {
        Arc::new(RuntimeFlags::new())
    }

    #[tokio::test]
    async fn read_round_trips_through_the_pipe() {
        let writes = Arc::new(AtomicU32::new(0));
        let (pipe, _handle) = DbPipe::spawn(CountingEngine { writes }, flags());

        let value = pipe.read("get_file", serde_json::json!({"hash": "abc"})).await.unwrap();
        assert_eq!(value["echo"], "get_file");
    }

    #[tokio::test]
    async fn write_synchronous_waits_for_completion() {
        let writes = Arc::new(AtomicU32::new(0));
        let (pipe, _handle) = DbPipe::spawn(CountingEngine { writes: writes.clone() }, flags());

        pipe.write_synchronous("set_file", serde_json::json!({})).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_is_fire_and_forget() {
        let writes = Arc::new(AtomicU32::new(0));
        let (pipe, _handle) = DbPipe::spawn(CountingEngine { writes: writes.clone() }, flags());

        pipe.write("set_file", serde_json::json!({}));
        pipe.wait_until_empty(Duration::from_secs(1)).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_resolves_queued_requests_with_shutdown_error() {
        let writes = Arc::new(AtomicU32::new(0));
        let flags = flags();
        let (pipe, handle) = DbPipe::spawn(CountingEngine { writes }, flags.clone());

        pipe.shutdown();
        let result = pipe.read("anything", serde_json::json!({})).await;
        let _ = handle.await;
        assert!(matches!(result, Err(err) if err.kind() == vaultkeep_core::ErrorKind::Shutdown));
    }
}
