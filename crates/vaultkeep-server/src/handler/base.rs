//! Base resources (§4.10): reachable without a session, present on
//! every service.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use vaultkeep_runtime::DbEngine;

use crate::response::ResponseContext;
use crate::state::ServiceState;

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

async fn root<E: DbEngine>(State(state): State<ServiceState<E>>) -> Response {
    ResponseContext::bytes(StatusCode::OK, "text/plain", state.config.server_header().into_bytes()).into_response()
}

async fn favicon() -> Response {
    ResponseContext::status(StatusCode::NO_CONTENT).into_response()
}

async fn robots() -> Response {
    ResponseContext::bytes(StatusCode::OK, "text/plain", ROBOTS_TXT.as_bytes().to_vec()).into_response()
}

pub fn routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new().route("/", get(root)).route("/favicon.ico", get(favicon)).route("/robots.txt", get(robots))
}
