#![forbid(unsafe_code)]
//! The server request pipeline (C9) layered on the runtime kernel: a
//! staged request lifecycle (restrictions -> argument parse -> session/
//! account check -> dispatch to the controller -> render) plus the
//! resource taxonomy (C10) that composes per-service routers.

pub mod args;
pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod response;
pub mod role;
pub mod session;
pub mod state;

pub use config::ServiceConfig;
pub use error::{Error, ErrorKind, Result};
pub use handler::{build_router, ServiceKind};
pub use response::{ResponseBody, ResponseContext};
pub use role::ServerRoleHooks;
pub use session::{Account, AccessKey, Permission, Quota, RegistrationKey, SessionKey, SessionManager};
pub use state::ServiceState;

use axum::middleware::from_fn_with_state;
use axum::Router;

use vaultkeep_runtime::DbEngine;

/// Wraps a resource-taxonomy router ([`build_router`]) with the
/// restrictions and CORS middleware stages, in the order §4.9 lists them:
/// stage 1 (restrictions) runs outermost of the two, so a request never
/// reaches argument parsing or CORS handling while `server_busy` is
/// latched. `server_header` wraps both, so `Server: <service-type>/
/// <network-version>` (§6) is stamped on every response this service
/// produces, including ones restrictions/CORS reject outright.
pub fn assemble_service<E: DbEngine>(kind: ServiceKind, state: ServiceState<E>) -> Router<ServiceState<E>> {
    build_router(kind)
        .layer(from_fn_with_state(state.clone(), middleware::cors))
        .layer(from_fn_with_state(state.clone(), middleware::restrictions))
        .layer(from_fn_with_state(state, middleware::server_header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use vaultkeep_listener::ListenerManager;
    use vaultkeep_runtime::{Controller, DaemonHandle, DbArgs, DbEngine, DbFactory, DbValue, IdleDetector, PubSub, Result as RuntimeResult, RoleHooks};

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
            Arc::new(vaultkeep_runtime::ServerIdleDetector::new(flags))
        }

        fn maintain_db<'a>(&'a self, _controller: &'a Controller<NoopEngine>) -> futures::future::BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        fn spawn_daemons(&self, _controller: &Arc<Controller<NoopEngine>>) -> Vec<DaemonHandle> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn assembled_service_answers_root() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(dir.path().to_path_buf(), true, Arc::new(NoopRoleHooks), NoopFactory).await.unwrap();
        let bus = PubSub::new(controller.flags().clone());
        let (listener, _reactor) = ListenerManager::spawn(bus);

        let config = ServiceConfig::new("server administration", 50);
        let sessions = Arc::new(SessionManager::new());
        let state = ServiceState::new(controller, config, sessions, listener);

        let router = assemble_service(ServiceKind::Admin, state.clone()).with_state(state);

        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let response = router.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        assert_eq!(response.headers().get(axum::http::header::SERVER).unwrap(), "server administration/50");
    }
}
