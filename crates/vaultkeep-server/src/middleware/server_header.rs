//! Render-stage header stamp (§6 "Required headers"): every response —
//! including ones the restrictions/CORS stages reject before a handler
//! ever runs — carries `Server: <service-type>/<network-version>`, the
//! same value the sibling-shutdown handshake matches on to find the
//! admin service among a set of candidate ports.
//!
//! Applied as the outermost layer in `assemble_service` so it sees (and
//! stamps) the final response regardless of which stage produced it.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use vaultkeep_runtime::DbEngine;

use crate::state::ServiceState;

const TRACING_TARGET: &str = "vaultkeep_server::middleware::server_header";

pub async fn server_header<E: DbEngine>(State(state): State<ServiceState<E>>, request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    match HeaderValue::from_str(&state.config.server_header()) {
        Ok(value) => {
            response.headers_mut().insert(header::SERVER, value);
        }
        Err(err) => {
            tracing::warn!(target: TRACING_TARGET, %err, "service type is not a valid header value, Server header omitted");
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use tower::ServiceExt;

    use vaultkeep_listener::ListenerManager;
    use vaultkeep_runtime::{Controller, DaemonHandle, DbArgs, DbEngine, DbFactory, DbValue, IdleDetector, PubSub, Result as RuntimeResult, RoleHooks};

    use crate::config::ServiceConfig;
    use crate::session::SessionManager;
    use crate::state::ServiceState;

    use super::server_header;

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
    async fn stamps_the_server_header_on_every_response() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(dir.path().to_path_buf(), true, Arc::new(NoopRoleHooks), NoopFactory).await.unwrap();
        let bus = PubSub::new(controller.flags().clone());
        let (listener, _reactor) = ListenerManager::spawn(bus);

        let config = ServiceConfig::new("server administration", 50);
        let sessions = Arc::new(SessionManager::new());
        let state = ServiceState::new(controller, config, sessions, listener);

        let router: Router<ServiceState<NoopEngine>> = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(state.clone(), server_header))
            .with_state(state);

        let response = router.oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.headers().get(axum::http::header::SERVER).unwrap(), "server administration/50");
    }
}
