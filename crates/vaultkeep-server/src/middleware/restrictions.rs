//! Stage 1 of the request pipeline (§4.9): domain/local-only check,
//! `server_busy` latch, and `User-Agent` network-version check.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_client_ip::ClientIp;

use vaultkeep_runtime::DbEngine;

use crate::error::ErrorKind;
use crate::state::ServiceState;

const TRACING_TARGET: &str = "vaultkeep_server::middleware::restrictions";
const HYDRUS_USER_AGENT_PREFIX: &str = "hydrus/";

/// Extracts the network version a `hydrus/<version>` `User-Agent` header
/// declares, if present. Requests without that prefix are not
/// hydrus-client requests and are exempt from the version check.
fn declared_network_version(headers: &HeaderMap) -> Option<u32> {
    let user_agent = headers.get(axum::http::header::USER_AGENT)?.to_str().ok()?;
    let version = user_agent.strip_prefix(HYDRUS_USER_AGENT_PREFIX)?;
    version.trim().parse().ok()
}

/// Applied to every route: rejects requests while `server_busy` is
/// latched, rejects requests to local-only services from non-loopback
/// addresses, and rejects a declared network version that disagrees with
/// this service's own.
pub async fn restrictions<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    ClientIp(client_ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    if state.controller.flags().server_busy() {
        tracing::debug!(target: TRACING_TARGET, "rejecting request: server busy");
        return ErrorKind::ServerBusy.with_message("server is busy, try again shortly").into_response();
    }

    if state.config.local_only && !client_ip.is_loopback() {
        tracing::warn!(target: TRACING_TARGET, %client_ip, "rejecting non-loopback request to local-only service");
        return ErrorKind::InsufficientCredentials
            .with_message("this service only accepts local connections")
            .into_response();
    }

    if let Some(declared) = declared_network_version(request.headers())
        && declared != state.config.network_version
    {
        tracing::debug!(target: TRACING_TARGET, declared, expected = state.config.network_version, "network version mismatch");
        return ErrorKind::NetworkVersion
            .with_message(format!(
                "NETWORK_VERSION mismatch: client declared {declared}, server speaks {}",
                state.config.network_version
            ))
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_hydrus_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, HeaderValue::from_static("hydrus/50"));
        assert_eq!(declared_network_version(&headers), Some(50));
    }

    #[test]
    fn non_hydrus_user_agent_is_exempt() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, HeaderValue::from_static("curl/8.0"));
        assert_eq!(declared_network_version(&headers), None);
    }

    #[test]
    fn missing_user_agent_is_exempt() {
        assert_eq!(declared_network_version(&HeaderMap::new()), None);
    }
}
