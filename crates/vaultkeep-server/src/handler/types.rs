//! Typed request/response envelopes, one pair per endpoint (Design Note:
//! "Dynamic argument bags... typed envelope per endpoint", as opposed to
//! a dynamic map).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::Permission;

#[derive(Debug, Deserialize)]
pub struct AccessKeyRequest {
    pub registration_key: String,
}

#[derive(Debug, Serialize)]
pub struct AccessKeyResponse {
    pub access_key: String,
}

#[derive(Debug, Serialize)]
pub struct AccessKeyVerificationResponse {
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account_id: Uuid,
    pub permissions: Vec<Permission>,
    pub bytes_used: u64,
    pub bytes_remaining: u64,
    pub requests_used: u64,
    pub requests_remaining: u64,
}

#[derive(Debug, Serialize)]
pub struct AccountInfoResponse {
    pub account_id: Uuid,
    pub is_functional: bool,
    pub banned: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountTypesResponse {
    pub account_types: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct RegistrationKeysRequest {
    pub count: u32,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationKeysResponse {
    pub registration_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BusyResponse {
    pub busy: bool,
}

#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    pub destination: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub started: bool,
}

#[derive(Debug, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceSummary>,
}

#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub service_key: String,
    pub service_type: String,
}

#[derive(Debug, Serialize)]
pub struct NumPetitionsResponse {
    pub num_petitions: u64,
}

#[derive(Debug, Deserialize)]
pub struct PetitionQuery {
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct PetitionResponse {
    pub petitions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuery {
    pub update_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub since_timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub metadata: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct IpQuery {
    pub hash: String,
}

#[derive(Debug, Serialize)]
pub struct IpResponse {
    pub ip: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub hash: String,
}
