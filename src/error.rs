// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Error Handling
//!
//! A single error type for all API responses. Every handler error funnels
//! through [`ApiError`], which maps to one of the eight response codes the
//! core defines and serializes as:
//!
//! ```json
//! { "error": "CODE", "message": "...", "details": null }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// The fixed error taxonomy. Every failure mode in the system maps to
/// exactly one of these; handlers never invent ad hoc codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Locked,
    RateLimited,
    Internal,
}

impl ApiErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::Conflict => StatusCode::CONFLICT,
            ApiErrorCode::Locked => StatusCode::LOCKED,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiErrorCode::InvalidRequest => "invalid_request",
            ApiErrorCode::Unauthorized => "unauthorized",
            ApiErrorCode::Forbidden => "forbidden",
            ApiErrorCode::NotFound => "not_found",
            ApiErrorCode::Conflict => "conflict",
            ApiErrorCode::Locked => "locked",
            ApiErrorCode::RateLimited => "rate_limited",
            ApiErrorCode::Internal => "internal",
        }
    }
}

/// API error carrying a taxonomy code, a message, and optional structured
/// details. Implements `IntoResponse` so it can be returned directly from
/// handlers.
#[derive(Debug)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InvalidRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Conflict, message)
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Locked, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Internal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.code == ApiErrorCode::Internal {
            tracing::error!(message = %self.message, "internal error");
        }
        let body = Json(ErrorBody {
            error: self.code.as_str(),
            message: self.message,
            details: self.details,
        });
        (self.code.status(), body).into_response()
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(e: crate::storage::StorageError) -> Self {
        use crate::storage::StorageError as SE;
        match e {
            SE::NotFound(m) => ApiError::not_found(m),
            SE::AlreadyExists(m) => ApiError::conflict(m),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<crate::storage::db::DbError> for ApiError {
    fn from(e: crate::storage::db::DbError) -> Self {
        use crate::storage::db::DbError as DE;
        match e {
            DE::NotFound(m) => ApiError::not_found(m),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<crate::crypto::CryptoError> for ApiError {
    fn from(e: crate::crypto::CryptoError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<crate::opaque::OpaqueError> for ApiError {
    fn from(e: crate::opaque::OpaqueError) -> Self {
        use crate::opaque::OpaqueError as OE;
        match e {
            OE::SessionExpired | OE::SessionNotFound => {
                ApiError::invalid_request("opaque session expired or unknown")
            }
            OE::ProtocolError(m) => ApiError::invalid_request(m),
            OE::Internal(m) => ApiError::internal(m),
        }
    }
}

impl From<crate::session::store::SessionError> for ApiError {
    fn from(e: crate::session::store::SessionError) -> Self {
        use crate::session::store::SessionError as SE;
        match e {
            SE::NotFound | SE::WrongCohort => ApiError::unauthorized("session required"),
            SE::Expired => ApiError::unauthorized("session expired"),
            SE::Db(db) => db.into(),
        }
    }
}

impl From<crate::authorize::AuthorizeError> for ApiError {
    fn from(e: crate::authorize::AuthorizeError) -> Self {
        use crate::authorize::AuthorizeError as AE;
        match e {
            AE::NotFound => ApiError::not_found("authorize request not found"),
            AE::NotPending => ApiError::conflict("authorize request already finalized"),
            AE::Expired => ApiError::invalid_request("authorize request expired"),
            AE::CodeInvalid | AE::CodeExpired => {
                ApiError::invalid_request("authorization code expired or already used")
            }
            AE::ZkPayloadInvalid => ApiError::invalid_request(
                "drk_hash/drk_jwe missing or drk_hash does not match SHA-256(drk_jwe)",
            ),
            AE::Db(db) => db.into(),
        }
    }
}

impl From<crate::otp::OtpError> for ApiError {
    fn from(e: crate::otp::OtpError) -> Self {
        use crate::otp::OtpError as OE;
        match e {
            OE::NotSetUp => ApiError::invalid_request("OTP not set up"),
            OE::AlreadyVerified => ApiError::conflict("OTP already verified"),
            OE::Mismatch => ApiError::invalid_request("invalid OTP code"),
            OE::Locked => ApiError::locked("too many OTP attempts"),
            OE::Db(db) => db.into(),
            OE::Crypto(c) => c.into(),
        }
    }
}

impl From<crate::users::UserError> for ApiError {
    fn from(e: crate::users::UserError) -> Self {
        use crate::users::UserError as UE;
        match e {
            UE::NotFound => ApiError::not_found("user not found"),
            UE::EmailTaken => ApiError::conflict("email already registered"),
            UE::Db(db) => db.into(),
        }
    }
}

impl From<crate::jwks::JwksError> for ApiError {
    fn from(e: crate::jwks::JwksError) -> Self {
        use crate::jwks::JwksError as JE;
        match e {
            JE::NoActiveKey => ApiError::internal("no active signing key"),
            JE::KeyGeneration(m) | JE::Signing(m) => ApiError::internal(m),
            JE::Crypto(c) => c.into(),
            JE::Db(db) => db.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn constructors_set_code_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.code, ApiErrorCode::NotFound);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::invalid_request("bad");
        assert_eq!(bad.code, ApiErrorCode::InvalidRequest);

        let locked = ApiError::locked("too many attempts");
        assert_eq!(locked.code.status(), StatusCode::LOCKED);
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::invalid_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["message"], "bad data");
    }
}
