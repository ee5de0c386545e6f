//! [`ServerRoleHooks`]: the server side of the `RoleHooks` seam the
//! Design Note "Polymorphism across client/server controllers" calls
//! for, replacing the source's `ServerController` subclass.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vaultkeep_core::{RuntimeFlags, Timestamps};
use vaultkeep_runtime::{Controller, DaemonHandle, DbEngine, IdleDetector, PubSub, RoleHooks, ServerIdleDetector};

const TRACING_TARGET: &str = "vaultkeep_server::role";

/// §4.7 init order item 4: the server's `MaintainDB` pass is `analyze`
/// alone, bounded by a 10s budget (the client runs a longer sequence;
/// see `vaultkeep_client::role::ClientRoleHooks`).
const MAINTAIN_DB_BUDGET: Duration = Duration::from_secs(10);

/// Server-role behaviour injected into [`Controller`]: no idle
/// heuristic (headless process, §4.6), the server's `analyze`-only
/// `MaintainDB` pass, and the daemon set from §4.7 init order item 5.
#[derive(Default)]
pub struct ServerRoleHooks;

impl<E: DbEngine> RoleHooks<E> for ServerRoleHooks {
    fn role(&self) -> &'static str {
        "server"
    }

    /// §3: the server gets only the controller's own `misc` default;
    /// it does not add the client's watcher/gallery slot kinds.
    fn thread_slot_defaults(&self) -> Vec<(&'static str, usize)> {
        Vec::new()
    }

    fn upnp_services(&self) -> Vec<String> {
        Vec::new()
    }

    fn idle_detector(&self, _timestamps: Arc<Timestamps>, flags: Arc<RuntimeFlags>, _bus: Arc<PubSub>) -> Arc<dyn IdleDetector> {
        Arc::new(ServerIdleDetector::new(flags))
    }

    fn maintain_db<'a>(&'a self, controller: &'a Controller<E>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let budget = tokio::time::timeout(MAINTAIN_DB_BUDGET, controller.write_synchronous("analyze", serde_json::json!({}))).await;
            match budget {
                Ok(Err(err)) => tracing::warn!(target: TRACING_TARGET, %err, "analyze failed"),
                Err(_) => tracing::warn!(target: TRACING_TARGET, budget_secs = MAINTAIN_DB_BUDGET.as_secs(), "analyze did not finish within its budget"),
                Ok(Ok(_)) => {}
            }
        })
    }

    fn spawn_daemons(&self, controller: &Arc<Controller<E>>) -> Vec<DaemonHandle> {
        vec![spawn_sync_repositories(controller), spawn_save_dirty_objects(controller), spawn_delete_orphans(controller)]
    }
}

async fn daemon_loop<E, F>(name: &'static str, controller: Arc<Controller<E>>, cancel: CancellationToken, interval: Duration, mut tick: F)
where
    E: DbEngine,
    F: FnMut(&Arc<Controller<E>>) -> BoxFuture<'static, ()> + Send,
{
    tracing::debug!(target: TRACING_TARGET, daemon = name, "daemon starting");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if !controller.good_time_to_do_background_work() {
                    continue;
                }
                tick(&controller).await;
            }
        }
    }
    tracing::debug!(target: TRACING_TARGET, daemon = name, "daemon stopped");
}

fn spawn<E, F>(name: &'static str, controller: &Arc<Controller<E>>, interval: Duration, tick: F) -> DaemonHandle
where
    E: DbEngine,
    F: FnMut(&Arc<Controller<E>>) -> BoxFuture<'static, ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let handle: JoinHandle<()> = tokio::spawn(daemon_loop(name, controller.clone(), cancel.clone(), interval, tick));
    DaemonHandle::new(name, cancel, handle)
}

/// Pulls new repository updates from every synced repository (servers
/// federate petition/update data between each other, per §4.10's
/// repository resource).
fn spawn_sync_repositories<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("sync_repositories", controller, Duration::from_secs(30), |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("sync_repositories", serde_json::json!({})).await;
        })
    })
}

/// Flushes in-memory-dirty objects (accounts, services) back to the
/// storage engine.
fn spawn_save_dirty_objects<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("save_dirty_objects", controller, Duration::from_secs(30), |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("save_dirty_objects", serde_json::json!({})).await;
        })
    })
}

/// Deletes orphaned files no longer referenced by any account or
/// service.
fn spawn_delete_orphans<E: DbEngine>(controller: &Arc<Controller<E>>) -> DaemonHandle {
    spawn("delete_orphans", controller, Duration::from_secs(300), |controller| {
        let controller = controller.clone();
        Box::pin(async move {
            let _ = controller.write_synchronous("delete_orphans", serde_json::json!({})).await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeep_runtime::{DbArgs, DbFactory, DbValue, Result as RuntimeResult};

    struct NoopEngine;

    impl DbEngine for NoopEngine {
        async fn read(&self, _action: &str, _args: DbArgs) -> RuntimeResult<DbValue> {
            Ok(serde_json::json!(null))
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

    #[test]
    fn server_gets_no_extra_thread_slot_defaults() {
        let hooks = ServerRoleHooks;
        let defaults = RoleHooks::<NoopEngine>::thread_slot_defaults(&hooks);
        assert!(defaults.is_empty());
    }

    #[tokio::test]
    async fn boot_and_shutdown_a_server_controller() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(ServerRoleHooks);
        let controller = Controller::new(dir.path().to_path_buf(), true, hooks, NoopFactory).await.unwrap();
        controller.init_view();
        assert!(controller.is_booted());

        controller.shutdown_view().await;
        controller.shutdown_model().await;
    }

    #[tokio::test]
    async fn server_daemons_spawn_and_stop_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(ServerRoleHooks);
        let controller = Controller::new(dir.path().to_path_buf(), true, hooks, NoopFactory).await.unwrap();
        let daemons = RoleHooks::<NoopEngine>::spawn_daemons(&ServerRoleHooks, &controller);
        assert_eq!(daemons.len(), 3);
        for daemon in daemons {
            daemon.cancel_and_join().await;
        }
        controller.shutdown_view().await;
        controller.shutdown_model().await;
    }
}
