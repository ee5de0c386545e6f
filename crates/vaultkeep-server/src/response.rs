//! Stage 5 of the request pipeline (§4.9): write status, cookies,
//! content-type, content-length, and charge the account/service for
//! bytes served and one request.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use jiff::SignedDuration;
use uuid::Uuid;

use crate::session::SessionKey;

const TRACING_TARGET: &str = "vaultkeep_server::response";

/// What the dispatch stage hands to render: one of a byte body, a file
/// stream, or a bare status (§4.9 stage 5).
pub enum ResponseBody {
    Bytes { content_type: &'static str, body: Vec<u8> },
    Stream { content_type: String, body: Body, content_length: Option<u64> },
    Status,
}

/// Everything the render stage needs: the body to write, the status,
/// an optional `Set-Cookie: session_key=...` (only `/session_key`
/// issues one), and who to charge for the bytes served.
pub struct ResponseContext {
    pub status: StatusCode,
    pub body: ResponseBody,
    pub set_session_cookie: Option<(SessionKey, SignedDuration)>,
    pub charge_account: Option<Uuid>,
}

impl ResponseContext {
    pub fn status(status: StatusCode) -> Self {
        Self { status, body: ResponseBody::Status, set_session_cookie: None, charge_account: None }
    }

    pub fn bytes(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            body: ResponseBody::Bytes { content_type, body },
            set_session_cookie: None,
            charge_account: None,
        }
    }

    pub fn stream(content_type: impl Into<String>, body: Body, content_length: Option<u64>) -> Self {
        Self {
            status: StatusCode::OK,
            body: ResponseBody::Stream { content_type: content_type.into(), body, content_length },
            set_session_cookie: None,
            charge_account: None,
        }
    }

    pub fn with_session_cookie(mut self, session_key: SessionKey, max_age: SignedDuration) -> Self {
        self.set_session_cookie = Some((session_key, max_age));
        self
    }

    pub fn charged_to(mut self, account_id: Uuid) -> Self {
        self.charge_account = Some(account_id);
        self
    }

    /// Bytes this response contributes to bandwidth accounting, charged
    /// by the caller after the response has been handed to axum (§4.9
    /// stage 5: "account and service are charged for bytes served").
    pub fn bytes_served(&self) -> u64 {
        match &self.body {
            ResponseBody::Bytes { body, .. } => body.len() as u64,
            ResponseBody::Stream { content_length, .. } => content_length.unwrap_or(0),
            ResponseBody::Status => 0,
        }
    }
}

impl IntoResponse for ResponseContext {
    fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);

        if let Some((session_key, max_age)) = &self.set_session_cookie {
            let cookie = format!("session_key={}; Max-Age={}; Path=/", session_key.as_str(), max_age.as_secs());
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                builder = builder.header(header::SET_COOKIE, value);
            }
        }

        let response = match self.body {
            ResponseBody::Bytes { content_type, body } => builder
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::from(body)),
            ResponseBody::Stream { content_type, body, content_length } => {
                if let Some(length) = content_length {
                    builder = builder.header(header::CONTENT_LENGTH, length);
                }
                builder.header(header::CONTENT_TYPE, content_type).body(body)
            }
            ResponseBody::Status => builder.body(Body::empty()),
        };

        response.unwrap_or_else(|err| {
            tracing::error!(target: TRACING_TARGET, %err, "failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_served_reflects_body_length() {
        let ctx = ResponseContext::bytes(StatusCode::OK, "application/json", vec![0u8; 128]);
        assert_eq!(ctx.bytes_served(), 128);
    }

    #[test]
    fn status_only_response_has_no_bytes_served() {
        let ctx = ResponseContext::status(StatusCode::NO_CONTENT);
        assert_eq!(ctx.bytes_served(), 0);
    }
}
