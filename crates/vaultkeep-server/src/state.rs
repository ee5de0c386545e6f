//! Shared application state threaded through the axum router.

use std::sync::Arc;

use vaultkeep_listener::ListenerManager;
use vaultkeep_runtime::{Controller, DbEngine};

use crate::config::ServiceConfig;
use crate::session::SessionManager;

/// State every handler and middleware layer is given access to: the
/// runtime kernel, this service's static configuration, the
/// session/account collaborator (§4.9's "the controller does not hold
/// these directly ... the request pipeline consults both"), and the
/// listener manager the admin resource's `/services`/`/shutdown`
/// endpoints act on.
///
/// `#[derive(Clone)]` is deliberately not used here: it would add a
/// spurious `E: Clone` bound, since the derive clones every field type
/// parameter regardless of whether the field is behind an `Arc`.
pub struct ServiceState<E: DbEngine> {
    pub controller: Arc<Controller<E>>,
    pub config: Arc<ServiceConfig>,
    pub sessions: Arc<SessionManager>,
    pub listener: Arc<ListenerManager>,
}

impl<E: DbEngine> ServiceState<E> {
    pub fn new(
        controller: Arc<Controller<E>>,
        config: ServiceConfig,
        sessions: Arc<SessionManager>,
        listener: Arc<ListenerManager>,
    ) -> Self {
        Self { controller, config: Arc::new(config), sessions, listener }
    }
}

impl<E: DbEngine> Clone for ServiceState<E> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            config: Arc::clone(&self.config),
            sessions: Arc::clone(&self.sessions),
            listener: Arc::clone(&self.listener),
        }
    }
}
