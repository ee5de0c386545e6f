//! The reactor task and the command channel in front of it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use vaultkeep_core::Error;
use vaultkeep_runtime::{PubSub, Result};

const TRACING_TARGET: &str = "vaultkeep_listener";

/// Grace period given to a listener's in-flight connections before its
/// replacement (or a shutdown) forcibly tears it down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Opaque identifier for a hosted service (admin, file repository, tag
/// repository, local booru, client API, ...).
pub type ServiceKey = String;

/// TLS certificate/key material for a service that should not be served
/// in the clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Everything needed to bind one service's listener. `app` is the fully
/// assembled router for this service; this crate never constructs routes
/// itself (that is `vaultkeep-server`'s resource taxonomy, C10).
#[derive(Clone)]
pub struct ServiceSpec {
    pub key: ServiceKey,
    pub addr: SocketAddr,
    pub tls: Option<TlsMaterial>,
    pub app: Router,
}

impl ServiceSpec {
    /// Whether `other` describes the same bind as `self` — used to make a
    /// rebind request for identical parameters a no-op.
    fn same_bind_params(&self, other: &ServiceSpec) -> bool {
        self.addr == other.addr && self.tls == other.tls
    }
}

struct ListenerState {
    spec: ServiceSpec,
    handle: Handle,
    serve_task: JoinHandle<()>,
}

enum ListenerCommand {
    Bind { spec: ServiceSpec, reply: oneshot::Sender<Result<()>> },
    Stop { key: ServiceKey, reply: oneshot::Sender<()> },
    SetServices { specs: Vec<ServiceSpec>, reply: oneshot::Sender<Result<()>> },
    ShutdownAll { reply: oneshot::Sender<()> },
}

/// Front end to the single-reactor-task listener registry. Every mutating
/// call is forwarded to the reactor over an mpsc channel and the method
/// awaits the reactor's reply, so callers observe bind/rebind/stop as
/// atomic even though the reactor serialises them behind the scenes.
pub struct ListenerManager {
    tx: mpsc::UnboundedSender<ListenerCommand>,
    bus: Arc<PubSub>,
}

impl ListenerManager {
    /// Spawns the reactor task and returns the manager front-end plus its
    /// join handle.
    pub fn spawn(bus: Arc<PubSub>) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reactor = tokio::spawn(Self::reactor_loop(rx, bus.clone()));
        (Arc::new(Self { tx, bus }), reactor)
    }

    async fn reactor_loop(mut rx: mpsc::UnboundedReceiver<ListenerCommand>, bus: Arc<PubSub>) {
        let mut listeners: HashMap<ServiceKey, ListenerState> = HashMap::new();

        while let Some(command) = rx.recv().await {
            match command {
                ListenerCommand::Bind { spec, reply } => {
                    let result = Self::bind_one(&mut listeners, spec, &bus).await;
                    let _ = reply.send(result);
                }
                ListenerCommand::Stop { key, reply } => {
                    Self::stop_one(&mut listeners, &key).await;
                    let _ = reply.send(());
                }
                ListenerCommand::SetServices { specs, reply } => {
                    let result = Self::set_services(&mut listeners, specs, &bus).await;
                    let _ = reply.send(result);
                }
                ListenerCommand::ShutdownAll { reply } => {
                    let keys: Vec<ServiceKey> = listeners.keys().cloned().collect();
                    for key in keys {
                        Self::stop_one(&mut listeners, &key).await;
                    }
                    let _ = reply.send(());
                }
            }
        }

        tracing::info!(target: TRACING_TARGET, "listener reactor stopped");
    }

    async fn bind_one(listeners: &mut HashMap<ServiceKey, ListenerState>, spec: ServiceSpec, bus: &Arc<PubSub>) -> Result<()> {
        if let Some(existing) = listeners.get(&spec.key) {
            if existing.spec.same_bind_params(&spec) {
                tracing::debug!(target: TRACING_TARGET, key = %spec.key, "rebind with identical parameters, no-op");
                return Ok(());
            }
            Self::stop_one(listeners, &spec.key).await;
        }

        if let Err(err) = Self::precheck_port(spec.addr).await {
            tracing::warn!(target: TRACING_TARGET, key = %spec.key, addr = %spec.addr, "port already in use");
            bus.pub_immediate(
                "service_status",
                serde_json::json!({ "key": spec.key, "message": err.to_string() }),
            );
            return Err(err);
        }

        let handle = Handle::new();
        let serve_task = match &spec.tls {
            Some(tls) => Self::spawn_tls(spec.addr, tls.clone(), spec.app.clone(), handle.clone()).await?,
            None => Self::spawn_plain(spec.addr, spec.app.clone(), handle.clone()),
        };

        tracing::info!(target: TRACING_TARGET, key = %spec.key, addr = %spec.addr, tls = spec.tls.is_some(), "service bound");
        listeners.insert(spec.key.clone(), ListenerState { spec, handle, serve_task });
        Ok(())
    }

    async fn stop_one(listeners: &mut HashMap<ServiceKey, ListenerState>, key: &ServiceKey) {
        let Some(state) = listeners.remove(key) else { return };
        state.handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        match tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(1), state.serve_task).await {
            Ok(_) => tracing::info!(target: TRACING_TARGET, key = %key, "service stopped"),
            Err(_) => tracing::warn!(target: TRACING_TARGET, key = %key, "service did not stop within the grace period"),
        }
    }

    async fn set_services(listeners: &mut HashMap<ServiceKey, ListenerState>, specs: Vec<ServiceSpec>, bus: &Arc<PubSub>) -> Result<()> {
        let future_keys: std::collections::HashSet<ServiceKey> = specs.iter().map(|spec| spec.key.clone()).collect();
        let to_stop: Vec<ServiceKey> = listeners.keys().filter(|key| !future_keys.contains(*key)).cloned().collect();
        for key in to_stop {
            Self::stop_one(listeners, &key).await;
        }

        let mut first_error = None;
        for spec in specs {
            if let Err(err) = Self::bind_one(listeners, spec, bus).await
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn precheck_port(addr: SocketAddr) -> Result<()> {
        TcpListener::bind(addr).await.map(|_| ()).map_err(|_| Error::port_in_use(addr.port()))
    }

    fn spawn_plain(addr: SocketAddr, app: Router, handle: Handle) -> JoinHandle<()> {
        tokio::spawn(async move {
            let result = axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            if let Err(err) = result {
                tracing::error!(target: TRACING_TARGET, addr = %addr, error = %err, "listener task ended with an error");
            }
        })
    }

    async fn spawn_tls(addr: SocketAddr, tls: TlsMaterial, app: Router, handle: Handle) -> Result<JoinHandle<()>> {
        let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|err| Error::config(format!("could not load TLS certificates: {err}")))?;

        Ok(tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await;
            if let Err(err) = result {
                tracing::error!(target: TRACING_TARGET, addr = %addr, error = %err, "listener task ended with an error");
            }
        }))
    }

    /// Binds (or rebinds) a single service. Rebinding with identical
    /// parameters is a no-op; otherwise the old listener is stopped before
    /// the new one starts.
    pub async fn start_service(&self, spec: ServiceSpec) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ListenerCommand::Bind { spec, reply: reply_tx })
            .map_err(|_| Error::shutdown("listener reactor is gone"))?;
        reply_rx.await.map_err(|_| Error::shutdown("listener reactor dropped the reply"))?
    }

    /// Stops a single service's listener, if one is bound under `key`.
    pub async fn stop_service(&self, key: impl Into<ServiceKey>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ListenerCommand::Stop { key: key.into(), reply: reply_tx })
            .map_err(|_| Error::shutdown("listener reactor is gone"))?;
        reply_rx.await.map_err(|_| Error::shutdown("listener reactor dropped the reply"))
    }

    /// Reconciles the bound listeners with `specs`: anything bound under a
    /// key absent from `specs` is stopped, then every entry in `specs` is
    /// started or restarted.
    pub async fn set_services(&self, specs: Vec<ServiceSpec>) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ListenerCommand::SetServices { specs, reply: reply_tx })
            .map_err(|_| Error::shutdown("listener reactor is gone"))?;
        reply_rx.await.map_err(|_| Error::shutdown("listener reactor dropped the reply"))?
    }

    /// Stops every bound listener. Called from `ShutdownView` before the
    /// scheduler is torn down.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ListenerCommand::ShutdownAll { reply: reply_tx })
            .map_err(|_| Error::shutdown("listener reactor is gone"))?;
        reply_rx.await.map_err(|_| Error::shutdown("listener reactor dropped the reply"))
    }

    /// The pubsub bus used to surface bind failures; exposed for tests.
    pub fn bus(&self) -> &Arc<PubSub> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use vaultkeep_core::RuntimeFlags;

    fn test_bus() -> Arc<PubSub> {
        PubSub::new(Arc::new(RuntimeFlags::new()))
    }

    fn test_spec(key: &str, port: u16) -> ServiceSpec {
        ServiceSpec {
            key: key.to_string(),
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            tls: None,
            app: Router::new().route("/", get(|| async { "ok" })),
        }
    }

    #[tokio::test]
    async fn start_and_stop_a_plain_service() {
        let (manager, _reactor) = ListenerManager::spawn(test_bus());
        manager.start_service(test_spec("admin", 0)).await.unwrap_or_else(|err| panic!("{err}"));
        manager.stop_service("admin").await.unwrap();
    }

    #[tokio::test]
    async fn rebind_with_identical_params_is_a_noop() {
        let (manager, _reactor) = ListenerManager::spawn(test_bus());
        let spec = test_spec("admin", 18080);
        manager.start_service(spec.clone()).await.unwrap();
        manager.start_service(spec).await.unwrap();
        manager.stop_service("admin").await.unwrap();
    }

    #[tokio::test]
    async fn binding_an_already_used_port_is_rejected() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:18181").unwrap();

        let (manager, _reactor) = ListenerManager::spawn(test_bus());
        let result = manager.start_service(test_spec("admin", 18181)).await;

        assert!(matches!(result, Err(err) if err.kind() == vaultkeep_core::ErrorKind::PortInUse));
        drop(blocker);
    }

    #[tokio::test]
    async fn set_services_stops_services_absent_from_the_new_set() {
        let (manager, _reactor) = ListenerManager::spawn(test_bus());
        manager.start_service(test_spec("admin", 0)).await.unwrap();
        manager.start_service(test_spec("files", 0)).await.unwrap();

        manager.set_services(vec![test_spec("files", 0)]).await.unwrap();

        // "admin" was dropped from the new set and stopped; rebinding it
        // as a brand new service should succeed without a stale entry.
        manager.start_service(test_spec("admin", 0)).await.unwrap();
        manager.shutdown().await.unwrap();
    }
}
