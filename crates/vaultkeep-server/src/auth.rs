//! Stage 3 of the request pipeline (§4.9): extract the `session_key`
//! cookie, resolve it to an account via the session manager, and require
//! that account be functional.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use vaultkeep_runtime::DbEngine;

use crate::error::{Error, ErrorKind};
use crate::session::{Account, Permission, SessionKey, SessionManager};
use crate::state::ServiceState;

const TRACING_TARGET: &str = "vaultkeep_server::auth";
const SESSION_COOKIE_NAME: &str = "session_key";

/// An authenticated request context: the account the `session_key`
/// cookie resolved to. Only restricted resources (§4.10) extract this;
/// base resources are reachable without it.
#[derive(Debug, Clone)]
pub struct AuthState {
    pub account: Account,
}

impl AuthState {
    /// Fails unless `account` holds `permission`, mapping absence onto
    /// `403 InsufficientCredentials` (§4.9 stage 3, §7).
    pub fn require(&self, sessions: &SessionManager, permission: Permission) -> Result<(), Error> {
        sessions.require_permission(&self.account, permission)
    }
}

impl<E> FromRequestParts<ServiceState<E>> for AuthState
where
    E: DbEngine,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, service_state: &ServiceState<E>) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session_key = jar
            .get(SESSION_COOKIE_NAME)
            .map(|cookie| SessionKey::from(cookie.value().to_owned()))
            .ok_or_else(|| ErrorKind::MissingCredentials.with_message("session_key cookie is required"))?;

        let account = service_state.sessions.resolve(&session_key)?;
        if !account.is_functional() {
            tracing::debug!(target: TRACING_TARGET, account_id = %account.id, "rejecting non-functional account");
            return Err(ErrorKind::InsufficientCredentials.with_message("account is not functional"));
        }

        Ok(Self { account })
    }
}
