//! Admin resources (§4.10), layered on restricted: `/busy`, `/backup`,
//! `/services`, `/shutdown` (`/shutdown` is local-only; the
//! [`crate::middleware::restrictions`] stage enforces that per-service,
//! not here).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use vaultkeep_runtime::DbEngine;

use crate::args::EnhancedJson;
use crate::auth::AuthState;
use crate::error::Error;
use crate::handler::types::{BackupRequest, BackupResponse, BusyResponse, ServiceSummary, ServicesResponse};
use crate::response::ResponseContext;
use crate::session::Permission;
use crate::state::ServiceState;

fn json(status: StatusCode, body: &impl serde::Serialize) -> Result<Response, Error> {
    Ok(ResponseContext::bytes(status, "application/json", serde_json::to_vec(body)?).into_response())
}

/// `/busy`: reports the `server_busy` latch without requiring any
/// particular permission, so monitoring tooling can poll it cheaply.
async fn busy<E: DbEngine>(State(state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    let _ = auth;
    json(StatusCode::OK, &BusyResponse { busy: state.controller.flags().server_busy() })
}

/// `/backup`: dispatches a `WriteSynchronous("backup", ...)` through the
/// controller (§4.7's database request pipe), gated on
/// [`Permission::GeneralAdmin`].
async fn backup<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    auth: AuthState,
    EnhancedJson(request): EnhancedJson<BackupRequest>,
) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::GeneralAdmin)?;

    state
        .controller
        .write_synchronous("backup", serde_json::json!({ "destination": request.destination }))
        .await?;

    json(StatusCode::OK, &BackupResponse { started: true })
}

/// `/services` GET: summarises the bound listeners by consulting the
/// controller's `Read("get_services", ...)` (the concrete service
/// registry is storage-engine state, out of scope per §1).
async fn services_get<E: DbEngine>(State(state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::GeneralAdmin)?;

    let value = state.controller.read("get_services", serde_json::json!({})).await?;
    let services: Vec<ServiceSummary> = serde_json::from_value(value).unwrap_or_default();
    json(StatusCode::OK, &ServicesResponse { services })
}

/// `/shutdown`: local-only (enforced by the restrictions stage, since
/// this service is configured `local_only`); asks the controller to set
/// `server_busy` and begin an emergency teardown rather than tearing down
/// inline on the request task.
async fn shutdown<E: DbEngine>(State(state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::GeneralAdmin)?;

    state.controller.flags().set_server_busy(true);
    state.controller.pub_immediate("shutdown_requested", serde_json::json!({}));

    Ok(ResponseContext::status(StatusCode::OK).into_response())
}

pub fn routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new()
        .route("/busy", get(busy))
        .route("/backup", post(backup))
        .route("/services", get(services_get))
        .route("/shutdown", post(shutdown))
}
