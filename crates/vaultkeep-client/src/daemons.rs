//! Client-role long-lived background daemons (§4.7 init order item 5):
//! download files, subscriptions sync, trash, repo sync, import/export
//! folders, account sync, and the mouse-idle probe.
//!
//! Each is a periodic loop gated on `GoodTimeToDoBackgroundWork` where the
//! spec calls for that (§4.7's `idle ∧ ¬just_woke ∧ ¬system_busy`) and
//! otherwise just ticks on its own interval; concrete media/network work
//! is out of scope (§1 Non-goals: concrete media parsing, CLI/packaging)
//! so each loop dispatches through `Read`/`WriteSynchronous` actions the
//! storage-engine black box is expected to implement.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::timing::names;
use vaultkeep_runtime::{Controller, DaemonHandle, DbEngine};

const TRACING_TARGET: &str = "vaultkeep_client::daemons";

/// Runs `tick` on `interval`, skipping a tick when `gate_on_idle` is set
/// and the controller does not currently think it is a good time for
/// background work, until `cancel` fires.
async fn daemon_loop<E, F>(name: &'static str, controller: Arc<Controller<E>>, cancel: CancellationToken, interval: Duration, gate_on_idle: bool, mut tick: F)
where
    E: DbEngine,
    F: FnMut(&Arc<Controller<E>>) -> futures::future::BoxFuture<'static, ()> + Send,
{
    tracing::debug!(target: TRACING_TARGET, daemon = name, "daemon starting");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if gate_on_idle && !controller.good_time_to_do_background_work() {
                    continue;
                }
                tick(&controller).await;
            }
        }
    }
    tracing::debug!(target: TRACING_TARGET, daemon = name, "daemon stopped");
}

fn spawn<E, F>(
    name: &'static str,
    controller: &Arc<Controller<E>>,
    interval: Duration,
    gate_on_idle: bool,
    tick: F,
) -> DaemonHandle
where
    E: DbEngine,
    F: FnMut(&Arc<Controller<E>>) -> futures::future::BoxFuture<'static, ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(daemon_loop(name, controller.clone(), cancel.clone(), interval, gate_on_idle, tick));
    DaemonHandle::new(name, cancel, handle)
}

/// Pulls queued downloads from the subscription/url-download queue.
/// "Network puller" per §1's component summary.
pub fn spawn_download_files<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("download_files", controller, Duration::from_secs(5), true, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            if let Err(err) = controller.read("next_download", serde_json::json!({})).await {
                tracing::debug!(target: TRACING_TARGET, daemon = "download_files", %err, "no work or read failed");
            }
        })
    })
}

/// Periodically checks subscription queries for new results.
pub fn spawn_subscriptions_sync<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("subscriptions_sync", controller, Duration::from_secs(60), true, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("sync_subscriptions", serde_json::json!({})).await;
        })
    })
}

/// Empties files past their trash retention window.
pub fn spawn_trash<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("trash", controller, Duration::from_secs(300), true, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("empty_trash", serde_json::json!({})).await;
        })
    })
}

/// Pulls new repository updates from every synced repository.
pub fn spawn_repo_sync<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("repo_sync", controller, Duration::from_secs(30), false, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("sync_repositories", serde_json::json!({})).await;
        })
    })
}

/// Watches configured import/export folders for new files to ingest or
/// queries to re-export.
pub fn spawn_import_export_folders<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("import_export_folders", controller, Duration::from_secs(15), true, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("check_import_export_folders", serde_json::json!({})).await;
        })
    })
}

/// Refreshes monthly bandwidth/request usage cached from each synced
/// repository account.
pub fn spawn_account_sync<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("account_sync", controller, Duration::from_secs(600), true, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("sync_accounts", serde_json::json!({})).await;
        })
    })
}

/// Mouse-idle probe: absent a real input hook (GUI is out of scope per
/// §1), this stands in for the source's mouse-movement listener by
/// touching `last_mouse_action` whenever the host OS reports recent
/// input activity through the storage-engine black box's
/// `recent_input_activity` read action. A negative/errored read is
/// treated as "no new activity" rather than propagated, since a probe
/// failing should never bring the daemon down.
pub fn spawn_mouse_idle_probe<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("mouse_idle_probe", controller, Duration::from_secs(2), false, |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            if let Ok(value) = controller.read("recent_input_activity", serde_json::json!({})).await
                && value.as_bool().unwrap_or(false)
            {
                controller.timestamps().touch(names::LAST_MOUSE_ACTION);
                controller.timestamps().touch(names::LAST_USER_ACTION);
            }
        })
    })
}

/// Spawns every client daemon listed in §4.7's init order item 5.
pub fn spawn_all<E: DbEngine>(controller: &Arc<Controller<E>>) -> Vec<DaemonHandle> {
    vec![
        spawn_download_files(controller),
        spawn_subscriptions_sync(controller),
        spawn_trash(controller),
        spawn_repo_sync(controller),
        spawn_import_export_folders(controller),
        spawn_account_sync(controller),
        spawn_mouse_idle_probe(controller),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeep_runtime::{DbArgs, DbFactory, DbValue, IdleDetector, PubSub, Result as RuntimeResult, RoleHooks, ServerIdleDetector};

    struct NoopEngine;

    impl DbEngine for NoopEngine {
        async fn read(&self, _action: &str, _args: DbArgs) -> RuntimeResult<DbValue> {
            Ok(serde_json::json!(false))
        }

        async fn write(&self, _action: &str, _args: DbArgs) -> RuntimeResult<DbValue> {
            Ok(serde_json::json!(null))
        }
    }

    struct NoopFactory;

    impl DbFactory for NoopFactory {
        type Engine = NoopEngine;

        fn build(&self, _db_dir: &std::path::Path) -> RuntimeResult<Self::Engine> {
            Ok(NoopEngine)
        }
    }

    struct NoopRoleHooks;

    impl RoleHooks<NoopEngine> for NoopRoleHooks {
        fn role(&self) -> &'static str {
            "test"
        }

        fn thread_slot_defaults(&self) -> Vec<(&'static str, usize)> {
            Vec::new()
        }

        fn upnp_services(&self) -> Vec<String> {
            Vec::new()
        }

        fn idle_detector(
            &self,
            _timestamps: Arc<vaultkeep_core::Timestamps>,
            flags: Arc<vaultkeep_core::RuntimeFlags>,
            _bus: Arc<PubSub>,
        ) -> Arc<dyn IdleDetector> {
            Arc::new(ServerIdleDetector::new(flags))
        }

        fn maintain_db<'a>(&'a self, _controller: &'a Controller<NoopEngine>) -> futures::future::BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        fn spawn_daemons(&self, _controller: &Arc<Controller<NoopEngine>>) -> Vec<DaemonHandle> {
            Vec::new()
        }
    }

    async fn test_controller() -> Arc<Controller<NoopEngine>> {
        let dir = tempfile::tempdir().unwrap();
        Controller::new(dir.path().to_path_buf(), true, Arc::new(NoopRoleHooks), NoopFactory).await.unwrap()
    }

    #[tokio::test]
    async fn all_daemons_spawn_and_stop_cleanly() {
        let controller = test_controller().await;
        let daemons = spawn_all(&controller);
        assert_eq!(daemons.len(), 7);
        for daemon in daemons {
            daemon.cancel_and_join().await;
        }
    }
}
