//! [`ClientRoleHooks`]: the client side of the `RoleHooks` seam the
//! Design Note "Polymorphism across client/server controllers" calls
//! for, replacing the source's `ClientController` subclass.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use vaultkeep_core::{RuntimeFlags, Timestamps};
use vaultkeep_runtime::{ClientIdleConfig, ClientIdleDetector, Controller, DaemonHandle, DbEngine, IdleDetector, PubSub, RoleHooks};

use crate::daemons;

const TRACING_TARGET: &str = "vaultkeep_client::role";

/// Per-`MaintainDB` budget for each bounded client maintenance pass
/// (§4.7: "each bounded"). The concrete phash/tree/dup/reparse/vacuum/
/// analyze/service-info-cache algorithms are out of scope per §1's
/// Non-goals; this hook dispatches each pass through the controller's
/// database pipe as a distinct action and bounds the whole job with a
/// timeout rather than any individual pass, since the storage engine
/// owns its own internal budgeting.
const MAINTAIN_DB_BUDGET: Duration = Duration::from_secs(60);

const MAINTAIN_DB_PASSES: &[&str] =
    &["maintain_phash", "maintain_tree", "maintain_dup", "maintain_reparse", "maintain_vacuum", "maintain_analyze", "maintain_service_info_cache"];

/// Client-role behaviour injected into [`Controller`]: thread-slot
/// defaults, idle detection, the client's `MaintainDB` pass sequence, and
/// the daemon set from §4.7 init order item 5.
pub struct ClientRoleHooks {
    idle_config: ClientIdleConfig,
    upnp_services: Vec<String>,
}

impl ClientRoleHooks {
    pub fn new(idle_config: ClientIdleConfig, upnp_services: Vec<String>) -> Self {
        Self { idle_config, upnp_services }
    }
}

impl Default for ClientRoleHooks {
    fn default() -> Self {
        Self::new(ClientIdleConfig { idle_normal: true, ..ClientIdleConfig::default() }, Vec::new())
    }
}

impl<E: DbEngine> RoleHooks<E> for ClientRoleHooks {
    fn role(&self) -> &'static str {
        "client"
    }

    /// §3: client adds `watcher_files=(0,15)`, `watcher_check=(0,5)`,
    /// `gallery_files=(0,15)`, `gallery_search=(0,5)` on top of the
    /// controller's own `misc=(0,10)` default.
    fn thread_slot_defaults(&self) -> Vec<(&'static str, usize)> {
        vec![("watcher_files", 15), ("watcher_check", 5), ("gallery_files", 15), ("gallery_search", 5)]
    }

    fn upnp_services(&self) -> Vec<String> {
        self.upnp_services.clone()
    }

    fn idle_detector(&self, timestamps: Arc<Timestamps>, flags: Arc<RuntimeFlags>, bus: Arc<PubSub>) -> Arc<dyn IdleDetector> {
        Arc::new(ClientIdleDetector::new(timestamps, flags, bus, self.idle_config.clone()))
    }

    fn maintain_db<'a>(&'a self, controller: &'a Controller<E>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let budget = tokio::time::timeout(MAINTAIN_DB_BUDGET, async {
                for pass in MAINTAIN_DB_PASSES {
                    if let Err(err) = controller.write_synchronous(*pass, serde_json::json!({})).await {
                        tracing::warn!(target: TRACING_TARGET, pass, %err, "maintenance pass failed, continuing");
                    }
                }
            })
            .await;

            if budget.is_err() {
                tracing::warn!(target: TRACING_TARGET, budget_secs = MAINTAIN_DB_BUDGET.as_secs(), "MaintainDB did not finish within its budget");
            }
        })
    }

    fn spawn_daemons(&self, controller: &Arc<Controller<E>>) -> Vec<DaemonHandle> {
        daemons::spawn_all(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeep_runtime::{DbArgs, DbFactory, DbValue, Result as RuntimeResult};

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

    #[test]
    fn thread_slot_defaults_match_the_spec() {
        let hooks = ClientRoleHooks::default();
        let defaults = RoleHooks::<NoopEngine>::thread_slot_defaults(&hooks);
        assert_eq!(defaults.len(), 4);
        assert!(defaults.contains(&("watcher_files", 15)));
        assert!(defaults.contains(&("gallery_search", 5)));
    }

    #[tokio::test]
    async fn boot_and_shutdown_a_client_controller() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(ClientRoleHooks::default());
        let controller = Controller::new(dir.path().to_path_buf(), true, hooks, NoopFactory).await.unwrap();
        controller.init_view();
        assert!(controller.is_booted());

        controller.shutdown_view().await;
        controller.shutdown_model().await;
    }
}
