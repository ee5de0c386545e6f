//! Restricted resources (§4.10): `/access_key`, `/access_key_verification`,
//! `/session_key`, `/account`, `/account_info`, `/account_types`,
//! `/registration_keys`. All require a session and a functional account
//! except the two that establish one.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use vaultkeep_runtime::DbEngine;

use crate::args::EnhancedJson;
use crate::auth::AuthState;
use crate::error::{Error, ErrorKind};
use crate::handler::types::{
    AccessKeyRequest, AccessKeyResponse, AccessKeyVerificationResponse, AccountInfoResponse, AccountResponse,
    AccountTypesResponse, RegistrationKeysRequest, RegistrationKeysResponse,
};
use crate::response::ResponseContext;
use crate::session::{AccessKey, Permission, Quota, RegistrationKey};
use crate::state::ServiceState;

const HYDRUS_KEY_HEADER: &str = "Hydrus-Key";

fn hydrus_key(headers: &HeaderMap) -> Result<AccessKey, Error> {
    headers
        .get(HYDRUS_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| AccessKey::from(value.to_owned()))
        .ok_or_else(|| ErrorKind::MissingCredentials.with_message("Hydrus-Key header is required"))
}

async fn access_key<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    EnhancedJson(request): EnhancedJson<AccessKeyRequest>,
) -> Result<Response, Error> {
    let registration_key = RegistrationKey::from(request.registration_key);
    let access_key = state.sessions.redeem_registration_key(&registration_key)?;
    let response = AccessKeyResponse { access_key: access_key.as_str().to_owned() };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

async fn access_key_verification<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let access_key = hydrus_key(&headers)?;
    let verified = state.sessions.create_session(&access_key).is_ok();
    let response = AccessKeyVerificationResponse { verified };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

async fn session_key<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let access_key = hydrus_key(&headers)?;
    let (session_key, expires_at) = state.sessions.create_session(&access_key)?;
    let max_age = expires_at.duration_since(jiff::Timestamp::now());
    let ctx = ResponseContext::status(StatusCode::OK).with_session_cookie(session_key, max_age);
    Ok(ctx.into_response())
}

async fn account<E: DbEngine>(State(_state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    let quota = auth.account.quota;
    let response = AccountResponse {
        account_id: auth.account.id,
        permissions: auth.account.permissions.clone(),
        bytes_used: quota.used_bytes,
        bytes_remaining: quota.max_bytes.saturating_sub(quota.used_bytes),
        requests_used: quota.used_requests,
        requests_remaining: quota.max_requests.saturating_sub(quota.used_requests),
    };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

async fn account_info<E: DbEngine>(State(_state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    let response = AccountInfoResponse {
        account_id: auth.account.id,
        is_functional: auth.account.is_functional(),
        banned: auth.account.banned,
    };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

async fn account_types<E: DbEngine>(State(_state): State<ServiceState<E>>, _auth: AuthState) -> Result<Response, Error> {
    let response = AccountTypesResponse {
        account_types: vec!["import_files", "import_tags", "manage_petitions", "manage_accounts", "general_admin", "unrestricted"],
    };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

async fn registration_keys<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    auth: AuthState,
    EnhancedJson(request): EnhancedJson<RegistrationKeysRequest>,
) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::ManageAccounts)?;

    let keys = (0..request.count)
        .map(|_| {
            state
                .sessions
                .mint_registration_key(request.permissions.clone(), Quota::new(10 * 1024 * 1024 * 1024, 10_000))
                .as_str()
                .to_owned()
        })
        .collect();

    let response = RegistrationKeysResponse { registration_keys: keys };
    Ok(ResponseContext::bytes(StatusCode::OK, "application/json", serde_json::to_vec(&response)?).into_response())
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        ErrorKind::Internal.with_message(err.to_string())
    }
}

pub fn routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new()
        .route("/access_key", post(access_key))
        .route("/access_key_verification", get(access_key_verification))
        .route("/session_key", get(session_key))
        .route("/account", get(account))
        .route("/account_info", get(account_info))
        .route("/account_types", get(account_types))
        .route("/registration_keys", post(registration_keys))
}
