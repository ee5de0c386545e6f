//! CORS stage of the request pipeline (§4.9): unlike a generic
//! `tower_http::cors::CorsLayer`, support here is opt-in per service and
//! an `Origin`-bearing request against a service that never opted in
//! fails outright rather than silently omitting the allow-headers.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use vaultkeep_runtime::DbEngine;

use crate::error::ErrorKind;
use crate::state::ServiceState;

const TRACING_TARGET: &str = "vaultkeep_server::middleware::cors";

/// A plain `OPTIONS` with no `Origin` is left to axum's router, which
/// answers with `405` and an `Allow:` header listing every verb
/// registered for the resource (§4.9: "listing every verb whose handler
/// is overridden"). Only `Origin`-bearing requests are handled here.
pub async fn cors<E: DbEngine>(State(state): State<ServiceState<E>>, request: Request, next: Next) -> Response {
    let Some(origin) = request.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok().map(str::to_owned)) else {
        return next.run(request).await;
    };

    if !state.config.cors_enabled() || !state.config.allows_origin(&origin) {
        tracing::debug!(target: TRACING_TARGET, %origin, "rejecting cross-origin request: service does not support cors");
        return ErrorKind::DoesNotSupportCORS
            .with_message("this service does not support cross-origin requests")
            .into_response();
    }

    let origin_header = HeaderValue::from_str(&origin).unwrap_or_else(|_| HeaderValue::from_static("null"));

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_header);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type, Hydrus-Key"));
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin_header);
    response
}
