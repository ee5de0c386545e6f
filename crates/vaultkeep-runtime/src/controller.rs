//! Controller (C7): composes C1-C6 into the two-phase init / two-phase
//! shutdown runtime kernel embedded by both the client and the server.
//!
//! Client/server specialisation is expressed as one concrete struct,
//! generic over the storage engine ([`DbEngine`]) and parameterised by a
//! small [`RoleHooks`] interface supplied at construction, rather than
//! by subclassing a shared base controller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::{RuntimeFlags, Timestamps};

use crate::db::{DbEngine, DbFactory, DbPipe, DEFAULT_WAIT_UNTIL_DB_EMPTY_TIMEOUT};
use crate::error::{Error, Result};
use crate::idle::IdleDetector;
use crate::pubsub::{PubSub, Subscriber};
use crate::scheduler::{JobKind, ScheduledJob, ScheduledJobSnapshot, Scheduler, FAST_SCHEDULER_THRESHOLD};
use crate::slots::ThreadSlots;
use crate::workers::{BusyStatus, WorkerPool, WorkerSnapshot};

const TRACING_TARGET: &str = "vaultkeep_runtime::controller";

/// Interval for the `MaintainDB` maintenance job (§4.7).
pub const MAINTAIN_DB_INTERVAL: Duration = Duration::from_secs(300);
/// Interval for the `SleepCheck` maintenance job.
pub const SLEEP_CHECK_INTERVAL: Duration = Duration::from_secs(120);
/// Interval for the `MaintainMemoryFast` maintenance job.
pub const MAINTAIN_MEMORY_FAST_INTERVAL: Duration = Duration::from_secs(60);
/// Interval for the `MaintainMemorySlow` maintenance job.
pub const MAINTAIN_MEMORY_SLOW_INTERVAL: Duration = Duration::from_secs(300);
/// Interval for the `services_upnp` maintenance job.
pub const SERVICES_UPNP_INTERVAL: Duration = Duration::from_secs(43_200);

/// A long-lived background worker spawned by [`RoleHooks::spawn_daemons`].
///
/// `ShutdownView` cancels every daemon's token and then waits for its task
/// to finish, reporting progress on the pubsub bus as each one exits.
pub struct DaemonHandle {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn new(name: &'static str, cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { name, cancel, handle }
    }

    /// Cancels this daemon's token and awaits its task, for tests and
    /// standalone daemon management outside a full controller shutdown.
    pub async fn cancel_and_join(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Role-specific behaviour injected at construction time, per the Design
/// Note on replacing controller subclassing with small injected
/// interfaces. A concrete implementor exists in `vaultkeep-client`
/// (`ClientRoleHooks`) and `vaultkeep-server` (`ServerRoleHooks`).
pub trait RoleHooks<E: DbEngine>: Send + Sync + 'static {
    /// `"client"` or `"server"`, used only for tracing/diagnostics.
    fn role(&self) -> &'static str;

    /// Default `(kind, max)` thread-slot registrations for this role
    /// (§3: client adds `watcher_files`, `watcher_check`, `gallery_files`,
    /// `gallery_search`; both roles get `misc`).
    fn thread_slot_defaults(&self) -> Vec<(&'static str, usize)>;

    /// Service keys this role's UPnP/NAT-PMP refresh job should map.
    /// The concrete NAT traversal mechanics are out of scope (§1
    /// Non-goals name concrete network protocol internals only as
    /// "external collaborators"); this hook only supplies the service
    /// list and is free to no-op.
    fn upnp_services(&self) -> Vec<String>;

    /// Refreshes the UPnP/NAT-PMP mapping set for `services`.
    fn refresh_upnp(&self, services: &[String]) {
        let _ = services;
    }

    /// Builds this role's idle/sleep detector.
    fn idle_detector(&self, timestamps: Arc<Timestamps>, flags: Arc<RuntimeFlags>, bus: Arc<PubSub>) -> Arc<dyn IdleDetector>;

    /// Role-specific `MaintainDB` pass (§4.7 init order item 4): the
    /// server runs `analyze` with a 10s budget; the client runs
    /// phash/tree/dup/reparse/vacuum/analyze/service-info-cache passes,
    /// each bounded. The concrete passes are storage-engine specific and
    /// out of scope; this hook is the seam.
    fn maintain_db<'a>(&'a self, controller: &'a Controller<E>) -> BoxFuture<'a, ()>;

    /// Spawns this role's long-lived daemons (§4.7 init order item 5):
    /// client adds download/subscriptions/trash/repo-sync/import-export/
    /// account-sync/mouse-idle daemons; server adds sync-repositories/
    /// save-dirty-objects/delete-orphans daemons.
    fn spawn_daemons(&self, controller: &Arc<Controller<E>>) -> Vec<DaemonHandle>;
}

struct JoinHandles {
    fast_scheduler: Option<JoinHandle<()>>,
    slow_scheduler: Option<JoinHandle<()>>,
    pubsub_consumer: Option<JoinHandle<()>>,
    db_pipe: Option<JoinHandle<()>>,
}

/// The shared runtime kernel embedded by both the client and server
/// processes (C1-C7).
pub struct Controller<E: DbEngine> {
    db_dir: PathBuf,
    is_first_start: bool,
    flags: Arc<RuntimeFlags>,
    timestamps: Arc<Timestamps>,
    thread_slots: Arc<ThreadSlots>,
    bus: Arc<PubSub>,
    fast_scheduler: Arc<Scheduler>,
    slow_scheduler: Arc<Scheduler>,
    short_pool: Arc<WorkerPool>,
    long_pool: Arc<WorkerPool>,
    db: Arc<DbPipe>,
    idle: Arc<dyn IdleDetector>,
    role_hooks: Arc<dyn RoleHooks<E>>,
    daemon_jobs: Mutex<HashMap<&'static str, ScheduledJob>>,
    daemons: Mutex<Vec<DaemonHandle>>,
    temp_dir: Mutex<Option<TempDir>>,
    handles: Mutex<JoinHandles>,
}

impl<E: DbEngine> Controller<E> {
    /// `InitModel`: creates the temp dir, starts both schedulers,
    /// constructs the database engine via `factory`, and starts its
    /// serialising pipe. Does not yet register maintenance jobs or spawn
    /// daemons; call [`Controller::init_view`] for that.
    pub async fn new<F>(
        db_dir: PathBuf,
        is_first_start: bool,
        role_hooks: Arc<dyn RoleHooks<E>>,
        factory: F,
    ) -> Result<Arc<Self>>
    where
        F: DbFactory<Engine = E>,
    {
        let flags = Arc::new(RuntimeFlags::new());
        let timestamps = Arc::new(Timestamps::new());
        timestamps.touch(vaultkeep_core::timing::names::BOOT);

        let thread_slots = Arc::new(ThreadSlots::new());
        thread_slots.register("misc", 10);
        for (kind, max) in role_hooks.thread_slot_defaults() {
            thread_slots.register(kind, max);
        }

        let bus = PubSub::new(flags.clone());
        let pubsub_consumer = bus.clone().spawn_consumer();

        let fast_scheduler = Scheduler::new("fast", bus.clone(), flags.clone());
        let slow_scheduler = Scheduler::new("slow", bus.clone(), flags.clone());
        let fast_handle = fast_scheduler.clone().spawn();
        let slow_handle = slow_scheduler.clone().spawn();

        let temp_dir = tempfile::Builder::new()
            .prefix("vaultkeep-")
            .tempdir()
            .map_err(|err| Error::internal("could not create process-private temp dir").with_source(err))?;

        let engine = factory.build(&db_dir)?;
        let (db, db_handle) = DbPipe::spawn(engine, flags.clone());

        let idle = role_hooks.idle_detector(timestamps.clone(), flags.clone(), bus.clone());

        tracing::info!(target: TRACING_TARGET, role = role_hooks.role(), db_dir = %db_dir.display(), "controller model initialised");

        Ok(Arc::new(Self {
            db_dir,
            is_first_start,
            flags,
            timestamps,
            thread_slots,
            bus,
            fast_scheduler,
            slow_scheduler,
            short_pool: WorkerPool::new_short_task("short"),
            long_pool: WorkerPool::new_long_running("long"),
            db,
            idle,
            role_hooks,
            daemon_jobs: Mutex::new(HashMap::new()),
            daemons: Mutex::new(Vec::new()),
            temp_dir: Mutex::new(Some(temp_dir)),
            handles: Mutex::new(JoinHandles {
                fast_scheduler: Some(fast_handle),
                slow_scheduler: Some(slow_handle),
                pubsub_consumer: Some(pubsub_consumer),
                db_pipe: Some(db_handle),
            }),
        }))
    }

    /// `InitView`: registers the five recurring maintenance jobs and
    /// spawns this role's daemons, then marks the controller booted.
    pub fn init_view(self: &Arc<Self>) {
        self.register_maintenance_jobs();
        let daemons = self.role_hooks.spawn_daemons(self);
        *self.daemons.lock().expect("daemons mutex poisoned") = daemons;
        self.flags.set_is_booted(true);
        tracing::info!(target: TRACING_TARGET, role = self.role_hooks.role(), "controller view initialised");
    }

    fn register_maintenance_jobs(self: &Arc<Self>) {
        let this = self.clone();
        let maintain_db = self.slow_scheduler.add_job(
            "MaintainDB",
            MAINTAIN_DB_INTERVAL,
            JobKind::Repeating { period: MAINTAIN_DB_INTERVAL, should_delay_on_wakeup: true, wake_on_topic: None },
            move || {
                let this = this.clone();
                tokio::spawn(async move {
                    this.role_hooks.maintain_db(&this).await;
                });
            },
        );

        let this = self.clone();
        let sleep_check = self.slow_scheduler.add_job(
            "SleepCheck",
            SLEEP_CHECK_INTERVAL,
            JobKind::Repeating { period: SLEEP_CHECK_INTERVAL, should_delay_on_wakeup: false, wake_on_topic: None },
            move || this.idle.sleep_check(),
        );

        let this = self.clone();
        let maintain_memory_fast = self.fast_scheduler.add_job(
            "MaintainMemoryFast",
            MAINTAIN_MEMORY_FAST_INTERVAL,
            JobKind::Repeating { period: MAINTAIN_MEMORY_FAST_INTERVAL, should_delay_on_wakeup: false, wake_on_topic: None },
            move || {
                this.bus.pub_("memory_pulse", serde_json::json!({}));
                this.fast_scheduler.clear_out_dead();
                this.slow_scheduler.clear_out_dead();
            },
        );

        let this = self.clone();
        let maintain_memory_slow = self.slow_scheduler.add_job(
            "MaintainMemorySlow",
            MAINTAIN_MEMORY_SLOW_INTERVAL,
            JobKind::Repeating { period: MAINTAIN_MEMORY_SLOW_INTERVAL, should_delay_on_wakeup: true, wake_on_topic: None },
            move || {
                use std::io::Write;
                let _ = std::io::stdout().flush();
                this.short_pool.reap_idle();
                this.long_pool.reap_idle();
            },
        );

        let this = self.clone();
        let services_upnp = self.slow_scheduler.add_job(
            "services_upnp",
            SERVICES_UPNP_INTERVAL,
            JobKind::Repeating { period: SERVICES_UPNP_INTERVAL, should_delay_on_wakeup: true, wake_on_topic: None },
            move || {
                let services = this.role_hooks.upnp_services();
                this.role_hooks.refresh_upnp(&services);
            },
        );

        let mut jobs = self.daemon_jobs.lock().expect("daemon_jobs mutex poisoned");
        jobs.insert("MaintainDB", maintain_db);
        jobs.insert("SleepCheck", sleep_check);
        jobs.insert("MaintainMemoryFast", maintain_memory_fast);
        jobs.insert("MaintainMemorySlow", maintain_memory_slow);
        jobs.insert("services_upnp", services_upnp);
    }

    pub fn db_dir(&self) -> &std::path::Path {
        &self.db_dir
    }

    pub fn is_first_start(&self) -> bool {
        self.is_first_start
    }

    pub fn is_booted(&self) -> bool {
        self.flags.is_booted()
    }

    pub fn view_is_shutdown(&self) -> bool {
        self.flags.view_is_shutdown()
    }

    pub fn model_is_shutdown(&self) -> bool {
        self.flags.model_is_shutdown()
    }

    pub fn flags(&self) -> &Arc<RuntimeFlags> {
        &self.flags
    }

    pub fn timestamps(&self) -> &Arc<Timestamps> {
        &self.timestamps
    }

    /// The shared pub/sub bus (C1), handed to [`vaultkeep_listener::ListenerManager::spawn`]
    /// so a `PortInUse` bind failure can be surfaced through the same
    /// channel everything else publishes status on (§4.8).
    pub fn bus(&self) -> &Arc<PubSub> {
        &self.bus
    }

    // --- Scheduling -------------------------------------------------

    /// Routes to the fast scheduler when `delay <= 1.0s`, the slow
    /// scheduler otherwise.
    pub fn call_later(self: &Arc<Self>, name: impl Into<String>, delay: Duration, f: impl Fn() + Send + Sync + 'static) -> ScheduledJob {
        self.scheduler_for(delay).add_job(name, delay, JobKind::Once, f)
    }

    /// Routes by `delay` the same way as `call_later`; `period` only
    /// governs the reschedule interval once running.
    pub fn call_repeating(
        self: &Arc<Self>,
        name: impl Into<String>,
        delay: Duration,
        period: Duration,
        should_delay_on_wakeup: bool,
        wake_on_topic: Option<String>,
        f: impl Fn() + Send + Sync + 'static,
    ) -> ScheduledJob {
        self.scheduler_for(delay).add_job(
            name,
            delay,
            JobKind::Repeating { period, should_delay_on_wakeup, wake_on_topic },
            f,
        )
    }

    fn scheduler_for(&self, delay: Duration) -> &Arc<Scheduler> {
        if delay <= FAST_SCHEDULER_THRESHOLD {
            &self.fast_scheduler
        } else {
            &self.slow_scheduler
        }
    }

    /// Diagnostic dump of both schedulers' pending jobs
    /// (`DebugShowScheduledJobs`, supplemented from `original_source`).
    pub fn debug_scheduled_jobs(&self) -> Vec<ScheduledJobSnapshot> {
        let mut jobs = self.fast_scheduler.debug_snapshot();
        jobs.extend(self.slow_scheduler.debug_snapshot());
        jobs
    }

    // --- Work dispatch ------------------------------------------------

    pub fn call_to_thread(&self, f: impl FnOnce() + Send + 'static) {
        self.short_pool.call(f);
    }

    pub fn call_to_thread_long_running(&self, f: impl FnOnce() + Send + 'static) {
        self.long_pool.call(f);
    }

    pub async fn thread_pool_busy_status(&self) -> BusyStatus {
        self.short_pool.busy_status().await
    }

    /// Diagnostic enumeration of live workers (`GetThreadsSnapshot`,
    /// supplemented from `original_source`).
    pub fn threads_snapshot(&self) -> Vec<WorkerSnapshot> {
        let mut workers = self.short_pool.threads_snapshot();
        workers.extend(self.long_pool.threads_snapshot());
        workers
    }

    // --- Thread-slot governor -----------------------------------------

    pub fn acquire_thread_slot(&self, kind: &str) -> bool {
        self.thread_slots.acquire(kind)
    }

    pub fn release_thread_slot(&self, kind: &str) {
        self.thread_slots.release(kind);
    }

    // --- Database -------------------------------------------------------

    pub async fn read(&self, action: impl Into<String>, args: crate::db::DbArgs) -> Result<crate::db::DbValue> {
        self.db.read(action, args).await
    }

    pub fn write(&self, action: impl Into<String>, args: crate::db::DbArgs) {
        self.db.write(action, args);
    }

    pub async fn write_synchronous(&self, action: impl Into<String>, args: crate::db::DbArgs) -> Result<crate::db::DbValue> {
        self.db.write_synchronous(action, args).await
    }

    // --- PubSub ---------------------------------------------------------

    pub fn pub_(&self, topic: impl Into<String>, payload: serde_json::Value) {
        self.bus.pub_(topic, payload);
    }

    pub fn pub_immediate(&self, topic: impl Into<String>, payload: serde_json::Value) {
        self.bus.pub_immediate(topic, payload);
    }

    pub fn sub(&self, topic: impl Into<String>, subscriber: Subscriber) {
        self.bus.sub(topic, subscriber);
    }

    /// Wakes a named maintenance job immediately, e.g. to force an
    /// out-of-schedule `MaintainDB` pass after a big import.
    pub fn wake_daemon(&self, name: &str) -> bool {
        match self.daemon_jobs.lock().expect("daemon_jobs mutex poisoned").get(name) {
            Some(job) => {
                job.wake();
                true
            }
            None => false,
        }
    }

    // --- Waits -----------------------------------------------------------

    pub async fn wait_until_db_empty(&self) -> Result<()> {
        self.db.wait_until_empty(DEFAULT_WAIT_UNTIL_DB_EMPTY_TIMEOUT).await
    }

    pub async fn wait_until_pubsubs_empty(&self) {
        self.bus.wait_until_pubsubs_empty().await;
    }

    pub async fn wait_until_model_free(&self) -> Result<()> {
        self.wait_until_pubsubs_empty().await;
        self.wait_until_db_empty().await
    }

    // --- Predicates --------------------------------------------------------

    pub fn currently_idle(&self) -> bool {
        self.idle.currently_idle()
    }

    pub fn currently_very_idle(&self) -> bool {
        self.idle.currently_very_idle()
    }

    pub fn system_busy(&self) -> bool {
        self.idle.system_busy()
    }

    pub fn just_woke_from_sleep(&self) -> bool {
        self.idle.just_woke_from_sleep()
    }

    pub fn good_time_to_do_background_work(&self) -> bool {
        self.currently_idle() && !self.just_woke_from_sleep() && !self.system_busy()
    }

    // --- Shutdown --------------------------------------------------------

    /// Phase 1: cancels every daemon job and daemon, then waits for each
    /// daemon task to finish, publishing progress on the bus as it goes.
    pub async fn shutdown_view(&self) {
        tracing::info!(target: TRACING_TARGET, role = self.role_hooks.role(), "shutdown: view phase starting");
        self.flags.set_view_shutdown(true);

        for job in self.daemon_jobs.lock().expect("daemon_jobs mutex poisoned").values() {
            job.cancel();
        }

        let daemons = std::mem::take(&mut *self.daemons.lock().expect("daemons mutex poisoned"));
        let total = daemons.len();
        for (index, daemon) in daemons.into_iter().enumerate() {
            daemon.cancel.cancel();
            let name = daemon.name;
            if let Err(err) = daemon.handle.await {
                tracing::error!(target: TRACING_TARGET, daemon = name, error = %err, "daemon task panicked during shutdown");
            }
            self.bus.pub_immediate(
                "shutdown_progress",
                serde_json::json!({ "daemon": name, "completed": index + 1, "total": total }),
            );
        }

        tracing::info!(target: TRACING_TARGET, role = self.role_hooks.role(), "shutdown: view phase complete");
    }

    /// Phase 2: shuts down the database pipe, both schedulers, and the
    /// pubsub consumer, then deletes the temp dir.
    /// `model_shutdown ⇒ view_shutdown`: this always latches both flags,
    /// even if a caller calls this without having called
    /// [`Controller::shutdown_view`] first (the emergency-exit path).
    pub async fn shutdown_model(&self) {
        tracing::info!(target: TRACING_TARGET, role = self.role_hooks.role(), "shutdown: model phase starting");
        self.flags.set_model_shutdown_enforcing_view();

        self.db.shutdown();
        self.fast_scheduler.stop();
        self.slow_scheduler.stop();
        self.bus.stop_consumer();

        let mut handles = self.handles.lock().expect("handles mutex poisoned");
        for handle in [handles.db_pipe.take(), handles.fast_scheduler.take(), handles.slow_scheduler.take(), handles.pubsub_consumer.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.await;
        }
        drop(handles);

        self.temp_dir.lock().expect("temp_dir mutex poisoned").take();

        tracing::info!(target: TRACING_TARGET, role = self.role_hooks.role(), "shutdown: model phase complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbArgs, DbValue};
    use crate::idle::ServerIdleDetector;

    struct NoopEngine;

    impl DbEngine for NoopEngine {
        async fn read(&self, action: &str, args: DbArgs) -> Result<DbValue> {
            Ok(serde_json::json!({ "action": action, "args": args }))
        }

        async fn write(&self, _action: &str, _args: DbArgs) -> Result<DbValue> {
            Ok(serde_json::json!(null))
        }
    }

    struct NoopFactory;

    impl DbFactory for NoopFactory {
        type Engine = NoopEngine;

        fn build(&self, _db_dir: &std::path::Path) -> Result<Self::Engine> {
            Ok(NoopEngine)
        }
    }

    struct TestRoleHooks;

    impl RoleHooks<NoopEngine> for TestRoleHooks {
        fn role(&self) -> &'static str {
            "test"
        }

        fn thread_slot_defaults(&self) -> Vec<(&'static str, usize)> {
            vec![("watcher_files", 15)]
        }

        fn upnp_services(&self) -> Vec<String> {
            Vec::new()
        }

        fn idle_detector(&self, _timestamps: Arc<Timestamps>, flags: Arc<RuntimeFlags>, _bus: Arc<PubSub>) -> Arc<dyn IdleDetector> {
            Arc::new(ServerIdleDetector::new(flags))
        }

        fn maintain_db<'a>(&'a self, _controller: &'a Controller<NoopEngine>) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        fn spawn_daemons(&self, _controller: &Arc<Controller<NoopEngine>>) -> Vec<DaemonHandle> {
            Vec::new()
        }
    }

    async fn test_controller() -> Arc<Controller<NoopEngine>> {
        let dir = tempfile::tempdir().unwrap();
        Controller::new(dir.path().to_path_buf(), true, Arc::new(TestRoleHooks), NoopFactory).await.unwrap()
    }

    #[tokio::test]
    async fn boot_idempotence() {
        let controller = test_controller().await;
        assert!(!controller.is_booted());
        controller.init_view();
        assert!(controller.is_booted());
        assert!(!controller.view_is_shutdown());
    }

    #[tokio::test]
    async fn thread_slot_defaults_are_registered_from_role_hooks() {
        let controller = test_controller().await;
        assert!(controller.acquire_thread_slot("watcher_files"));
    }

    #[tokio::test]
    async fn read_and_write_round_trip_through_the_controller() {
        let controller = test_controller().await;
        let value = controller.read("get_thing", serde_json::json!({})).await.unwrap();
        assert_eq!(value["action"], "get_thing");
        controller.write_synchronous("set_thing", serde_json::json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_handshake_sets_flags_in_order() {
        let controller = test_controller().await;
        controller.init_view();

        controller.shutdown_view().await;
        assert!(controller.view_is_shutdown());
        assert!(!controller.model_is_shutdown());

        controller.shutdown_model().await;
        assert!(controller.model_is_shutdown());
        assert!(controller.view_is_shutdown());
    }

    #[tokio::test]
    async fn wake_daemon_wakes_a_registered_maintenance_job() {
        let controller = test_controller().await;
        controller.init_view();
        assert!(controller.wake_daemon("MaintainMemoryFast"));
        assert!(!controller.wake_daemon("NotARealJob"));
        controller.shutdown_view().await;
        controller.shutdown_model().await;
    }

    #[tokio::test]
    async fn good_time_to_do_background_work_is_false_for_headless_idle() {
        let controller = test_controller().await;
        assert!(!controller.good_time_to_do_background_work());
    }
}
