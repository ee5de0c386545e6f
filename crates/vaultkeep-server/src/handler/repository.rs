//! Repository resources (§4.10), layered on restricted: `/num_petitions`,
//! `/petition`, `/update`, `/metadata` are common to both repository
//! kinds. File-repository services additionally mount `/file`, `/ip`,
//! `/thumbnail` ([`file_repository_routes`]); tag-repository services
//! mount no further endpoints ([`tag_repository_routes`] is an empty
//! router, kept so the taxonomy composition in `mod.rs` stays explicit
//! about the Non-goal rather than silently omitting the branch).

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use vaultkeep_runtime::DbEngine;

use crate::args::EnhancedQuery;
use crate::auth::AuthState;
use crate::error::{Error, ErrorKind};
use crate::handler::types::{
    FileQuery, IpQuery, IpResponse, MetadataQuery, MetadataResponse, NumPetitionsResponse, PetitionQuery,
    PetitionResponse, ThumbnailQuery, UpdateQuery,
};
use crate::response::ResponseContext;
use crate::session::Permission;
use crate::state::ServiceState;

fn json(status: StatusCode, body: &impl serde::Serialize) -> Result<Response, Error> {
    Ok(ResponseContext::bytes(status, "application/json", serde_json::to_vec(body)?).into_response())
}

/// `/num_petitions`: count of pending petitions, gated on
/// [`Permission::ManagePetitions`].
async fn num_petitions<E: DbEngine>(State(state): State<ServiceState<E>>, auth: AuthState) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::ManagePetitions)?;
    let value = state.controller.read("num_petitions", serde_json::json!({})).await?;
    let num_petitions = value.as_u64().unwrap_or(0);
    json(StatusCode::OK, &NumPetitionsResponse { num_petitions })
}

/// `/petition`: the next pending petition for a content type, gated on
/// [`Permission::ManagePetitions`].
async fn petition<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<PetitionQuery>,
) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::ManagePetitions)?;
    let value = state
        .controller
        .read("petition", serde_json::json!({ "content_type": query.content_type }))
        .await?;
    let petitions = value.as_array().cloned().unwrap_or_default();
    json(StatusCode::OK, &PetitionResponse { petitions })
}

/// `/update`: fetches a serialised repository update artifact by its
/// content hash.
async fn update<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    _auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<UpdateQuery>,
) -> Result<Response, Error> {
    let value = state
        .controller
        .read("get_update", serde_json::json!({ "update_hash": query.update_hash }))
        .await?;
    let bytes = value
        .as_str()
        .map(str::as_bytes)
        .ok_or_else(|| ErrorKind::NotFound.with_message("update artifact not found"))?;
    Ok(ResponseContext::bytes(StatusCode::OK, "application/octet-stream", bytes.to_vec()).into_response())
}

/// `/metadata`: repository metadata changed since `since_timestamp`.
async fn metadata<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    _auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<MetadataQuery>,
) -> Result<Response, Error> {
    let value = state
        .controller
        .read("get_metadata", serde_json::json!({ "since_timestamp": query.since_timestamp }))
        .await?;
    let metadata = value.as_array().cloned().unwrap_or_default();
    json(StatusCode::OK, &MetadataResponse { metadata })
}

/// `/file` GET: returns the file by content hash if present, 404
/// otherwise (§4.10).
async fn file_get<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    _auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<FileQuery>,
) -> Result<Response, Error> {
    let value = state.controller.read("get_file", serde_json::json!({ "hash": query.hash })).await?;
    let bytes: Vec<u8> = serde_json::from_value(value).map_err(|_| ErrorKind::FileMissing.with_message("file not found"))?;
    Ok(ResponseContext::stream("application/octet-stream", Body::from(bytes), None).into_response())
}

/// `/file` POST: accepts an upload, streamed to the file-arguments parser
/// by stage 2 of the pipeline upstream of this handler; this handler
/// only persists the already-parsed bytes via `WriteSynchronous`.
async fn file_post<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    auth: AuthState,
    mut multipart: Multipart,
) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::ImportFiles)?;

    let mut bytes = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|err| ErrorKind::BadRequest.with_message(err.to_string()))? {
        bytes = field.bytes().await.map_err(|err| ErrorKind::BadRequest.with_message(err.to_string()))?.to_vec();
    }

    state
        .controller
        .write_synchronous("import_file", serde_json::json!({ "bytes": bytes, "account_id": auth.account.id }))
        .await?;

    Ok(ResponseContext::status(StatusCode::OK).into_response())
}

/// `/ip`: the client IP recorded against an uploaded file, if the service
/// was configured to log it.
async fn ip<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<IpQuery>,
) -> Result<Response, Error> {
    state.sessions.require_permission(&auth.account, Permission::ManageAccounts)?;
    let value = state.controller.read("get_ip", serde_json::json!({ "hash": query.hash })).await?;
    let response = IpResponse {
        ip: value.get("ip").and_then(|v| v.as_str()).map(str::to_owned),
        timestamp: value.get("timestamp").and_then(|v| v.as_i64()),
    };
    json(StatusCode::OK, &response)
}

/// `/thumbnail`: the generated thumbnail bytes for a file, by hash.
async fn thumbnail<E: DbEngine>(
    State(state): State<ServiceState<E>>,
    _auth: AuthState,
    EnhancedQuery(query): EnhancedQuery<ThumbnailQuery>,
) -> Result<Response, Error> {
    let value = state.controller.read("get_thumbnail", serde_json::json!({ "hash": query.hash })).await?;
    let bytes: Vec<u8> = serde_json::from_value(value).map_err(|_| ErrorKind::FileMissing.with_message("thumbnail not found"))?;
    Ok(ResponseContext::bytes(StatusCode::OK, "image/jpeg", bytes).into_response())
}

pub fn routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new()
        .route("/num_petitions", get(num_petitions))
        .route("/petition", get(petition))
        .route("/update", get(update))
        .route("/metadata", get(metadata))
}

pub fn file_repository_routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new()
        .route("/file", get(file_get).post(file_post))
        .route("/ip", get(ip))
        .route("/thumbnail", get(thumbnail))
}

/// Tag-repository services mount no endpoints beyond the common
/// repository resource (§4.10: "Tag repository — no further endpoints").
pub fn tag_repository_routes<E: DbEngine>() -> Router<ServiceState<E>> {
    Router::new()
}
