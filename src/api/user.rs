// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User-facing API: OPAQUE registration/login, cookie sessions, OTP
//! enrollment and verification, password change/recovery, the
//! zero-knowledge DRK envelope endpoints, and the app/scope catalog the
//! consent screen renders from.
//!
//! Every handler that accepts attacker-controlled secret material
//! (`opaque/register/start`, `opaque/login/start`, `otp/verify`,
//! `password/change/verify/start`) is rate-limited per `(ip, email)` via
//! [`crate::rate_limit::RateLimiter`].

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use base64ct::Encoding;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLog};
use crate::error::ApiError;
use crate::models::{Scope, SessionData};
use crate::otp::OtpStatus;
use crate::session::extractor::OptionalUserSession;
use crate::session::{cookies, Cohort, UserSession};
use crate::state::AppState;
use crate::users::User;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/user/opaque/register/start", post(register_start))
        .route("/api/user/opaque/register/finish", post(register_finish))
        .route("/api/user/opaque/login/start", post(login_start))
        .route("/api/user/opaque/login/finish", post(login_finish))
        .route("/api/user/session", get(get_session))
        .route("/api/user/logout", post(logout))
        .route("/api/user/refresh-token", post(refresh_token))
        .route("/api/user/otp/status", get(otp_status))
        .route("/api/user/otp/setup/init", post(otp_setup_init))
        .route("/api/user/otp/setup/verify", post(otp_setup_verify))
        .route("/api/user/otp/verify", post(otp_verify))
        .route("/api/user/otp/disable", post(otp_disable))
        .route(
            "/api/user/otp/backup-codes/regenerate",
            post(otp_regenerate_backup_codes),
        )
        .route("/api/user/password/change/start", post(password_change_start))
        .route("/api/user/password/change/finish", post(password_change_finish))
        .route(
            "/api/user/password/change/verify/start",
            post(password_change_verify_start),
        )
        .route(
            "/api/user/password/change/verify/finish",
            post(password_change_verify_finish),
        )
        .route(
            "/api/user/password/recovery/verify/start",
            post(password_recovery_verify_start),
        )
        .route(
            "/api/user/password/recovery/verify/finish",
            post(password_recovery_verify_finish),
        )
        .route(
            "/api/user/crypto/wrapped-drk",
            get(get_wrapped_drk).put(put_wrapped_drk),
        )
        .route("/api/user/crypto/enc-pub", put(put_enc_pub))
        .route(
            "/api/user/crypto/wrapped-enc-priv",
            get(get_wrapped_enc_priv).put(put_wrapped_enc_priv),
        )
        .route("/api/user/apps", get(list_apps))
        .route("/api/user/scope-descriptions", get(scope_descriptions))
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    base64ct::Base64UrlUnpadded::decode_vec(value)
        .map_err(|_| ApiError::invalid_request(format!("{field} is not valid base64url")))
}

fn encode_b64(bytes: &[u8]) -> String {
    base64ct::Base64UrlUnpadded::encode_string(bytes)
}

type HmacSha256 = Hmac<Sha256>;

/// A stable, non-reversible stand-in for `sub` when no account exists for
/// the attempted email, so a login against an unregistered address walks
/// the exact same code path (and returns the same response shape) as one
/// against a real but mismatched password. Keyed by the relying-party id
/// rather than a dedicated secret — this codebase keeps no server-wide
/// secret outside the KeK's AEAD use, and `rp_id` is non-secret but stable
/// per deployment, which is all uniformity here requires.
fn pseudo_sub(rp_id: &str, email: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(rp_id.as_bytes()).unwrap_or_else(|_| HmacSha256::new_from_slice(&[0u8; 32]).unwrap());
    mac.update(email.trim().to_ascii_lowercase().as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("anon_{}", encode_b64(&digest[..16]))
}

fn session_cookie(state: &AppState, session_id: &str) -> axum_extra::extract::cookie::Cookie<'static> {
    cookies::build(
        cookies::USER_SESSION_COOKIE,
        session_id.to_string(),
        state.config.is_development,
        None,
    )
    .into_owned()
}

fn refresh_cookie(state: &AppState, raw: &str) -> axum_extra::extract::cookie::Cookie<'static> {
    cookies::build(
        cookies::REFRESH_COOKIE,
        raw.to_string(),
        state.config.is_development,
        Some(time::Duration::days(30)),
    )
    .into_owned()
}

// =============================================================================
// OPAQUE registration
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterStartRequest {
    pub email: String,
    pub registration_request: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterStartResponse {
    pub message: String,
    /// Opaque handle for the pending registration, exchanged again at
    /// `register/finish`. Not a real OPAQUE server public key — there is
    /// none at this step — just named to match the wire shape callers
    /// already expect from an OPAQUE front end.
    pub server_public_key: String,
}

#[utoipa::path(
    post,
    path = "/api/user/opaque/register/start",
    tag = "Registration",
    request_body = RegisterStartRequest,
    responses((status = 200, body = RegisterStartResponse))
)]
async fn register_start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterStartRequest>,
) -> Result<Json<RegisterStartResponse>, ApiError> {
    if !state.config.self_registration_enabled {
        return Err(ApiError::forbidden("self-registration is disabled"));
    }
    if !state.rate_limiter.check(addr.ip(), &req.email) {
        return Err(ApiError::rate_limited("too many registration attempts"));
    }

    let request_bytes = decode_b64("registration_request", &req.registration_request)?;
    let (message, ()) = state
        .opaque_engine
        .register_start(&request_bytes, &req.email)?;
    let id = state.opaque_sessions.put_registration(req.email).await;

    Ok(Json(RegisterStartResponse {
        message: encode_b64(&message),
        server_public_key: id.to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterFinishRequest {
    pub server_public_key: String,
    pub email: String,
    pub name: String,
    pub registration_upload: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterFinishResponse {
    pub sub: String,
    pub access_token: String,
    pub refresh_token: String,
    pub requires_email_verification: bool,
}

#[utoipa::path(
    post,
    path = "/api/user/opaque/register/finish",
    tag = "Registration",
    request_body = RegisterFinishRequest,
    responses((status = 200, body = RegisterFinishResponse))
)]
async fn register_finish(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterFinishRequest>,
) -> Result<(CookieJar, Json<RegisterFinishResponse>), ApiError> {
    let id = Uuid::parse_str(&req.server_public_key)
        .map_err(|_| ApiError::invalid_request("invalid server_public_key"))?;
    let pending = state
        .opaque_sessions
        .take_registration(id)
        .await
        .map_err(|_| ApiError::invalid_request("registration session expired or unknown"))?;
    if pending.credential_identifier != req.email {
        return Err(ApiError::invalid_request("email does not match registration session"));
    }

    let upload_bytes = decode_b64("registration_upload", &req.registration_upload)?;
    let password_file = state.opaque_engine.register_finish(&upload_bytes)?;

    let result = state.users.create(&req.email, &req.name);
    let user = audit::wrap_user(&state, AuditEventType::UserRegistered, None, result)?;

    state.opaque_records.put(&user.sub, &password_file)?;

    let data = SessionData {
        password_reset_required: user.password_reset_required,
        ..Default::default()
    };
    let session_id = state.sessions.create(Cohort::User, &user.sub, data)?;
    let refresh = state.sessions.issue_refresh(Cohort::User, &session_id)?;

    let jar = jar
        .add(session_cookie(&state, &session_id))
        .add(refresh_cookie(&state, &refresh));

    Ok((
        jar,
        Json(RegisterFinishResponse {
            sub: user.sub,
            access_token: session_id,
            refresh_token: refresh,
            requires_email_verification: state.config.email_verification_required
                && !user.email_verified,
        }),
    ))
}

// =============================================================================
// OPAQUE login
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginStartRequest {
    pub email: String,
    pub credential_request: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginStartResponse {
    pub message: String,
    pub sub: String,
    pub session_id: String,
}

#[utoipa::path(
    post,
    path = "/api/user/opaque/login/start",
    tag = "Login",
    request_body = LoginStartRequest,
    responses((status = 200, body = LoginStartResponse))
)]
async fn login_start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<LoginStartRequest>,
) -> Result<Json<LoginStartResponse>, ApiError> {
    if !state.rate_limiter.check(addr.ip(), &req.email) {
        return Err(ApiError::rate_limited("too many login attempts"));
    }

    let request_bytes = decode_b64("credential_request", &req.credential_request)?;
    let user = state.users.find_by_email(&req.email)?;
    let (sub, password_file) = match &user {
        Some(user) => (user.sub.clone(), state.opaque_records.get(&user.sub)?),
        None => (pseudo_sub(&state.config.rp_id, &req.email), None),
    };

    let (message, server_login_state) =
        state
            .opaque_engine
            .login_start(password_file.as_deref(), &request_bytes, &req.email)?;
    let login_id = state
        .opaque_sessions
        .put_login(req.email, server_login_state)
        .await;

    Ok(Json(LoginStartResponse {
        message: encode_b64(&message),
        sub,
        session_id: login_id.to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginFinishRequest {
    pub session_id: String,
    pub sub: String,
    pub credential_finalization: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginFinishResponse {
    pub sub: String,
    pub access_token: String,
    pub refresh_token: String,
    pub otp_required: bool,
}

#[utoipa::path(
    post,
    path = "/api/user/opaque/login/finish",
    tag = "Login",
    request_body = LoginFinishRequest,
    responses((status = 200, body = LoginFinishResponse), (status = 401, description = "invalid credentials"))
)]
async fn login_finish(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginFinishRequest>,
) -> Result<(CookieJar, Json<LoginFinishResponse>), ApiError> {
    match perform_login_finish(&state, &req.session_id, &req.sub, &req.credential_finalization).await {
        Ok(user) => {
            let (jar, body) = issue_login_session(&state, jar, &user)?;
            audit::record(&state, AuditEventType::LoginSuccess, Some(&user.sub), None, true, None);
            Ok((jar, Json(body)))
        }
        Err(e) => {
            audit::record(&state, AuditEventType::LoginFailure, None, None, false, Some("invalid credentials"));
            Err(e)
        }
    }
}

/// Shared core of `opaque/login/finish` and `password/recovery/verify/finish`:
/// both end a login-state-machine exchange against a stored password file
/// and must fail with an identical `Unauthorized` shape regardless of
/// whether the mismatch was "no such user" or "wrong password" — so this
/// never uses `?` on the underlying [`crate::opaque::OpaqueError`], which
/// would otherwise surface a distinguishing `invalid_request`.
async fn perform_login_finish(
    state: &AppState,
    session_id: &str,
    claimed_sub: &str,
    credential_finalization: &str,
) -> Result<User, ApiError> {
    let unauthorized = || ApiError::unauthorized("invalid email or password");

    let id = Uuid::parse_str(session_id).map_err(|_| unauthorized())?;
    let pending = state
        .opaque_sessions
        .take_login(id)
        .await
        .map_err(|_| unauthorized())?;

    let user = state
        .users
        .find_by_email(&pending.credential_identifier)
        .map_err(|_| unauthorized())?;
    let expected_sub = match &user {
        Some(user) => user.sub.clone(),
        None => pseudo_sub(&state.config.rp_id, &pending.credential_identifier),
    };
    if claimed_sub != expected_sub {
        return Err(unauthorized());
    }

    let finalization_bytes = decode_b64("credential_finalization", credential_finalization)
        .map_err(|_| unauthorized())?;
    state
        .opaque_engine
        .login_finish(&pending.server_login_state, &finalization_bytes)
        .map_err(|_| unauthorized())?;

    user.ok_or_else(unauthorized)
}

fn issue_login_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
) -> Result<(CookieJar, LoginFinishResponse), ApiError> {
    let otp_status = state.otp.status(&user.sub)?;
    let otp_required = matches!(
        otp_status.map(|c| c.status()),
        Some(OtpStatus::Enabled) | Some(OtpStatus::Locked)
    );

    let data = SessionData {
        otp_required,
        password_reset_required: user.password_reset_required,
        ..Default::default()
    };
    let session_id = state.sessions.create(Cohort::User, &user.sub, data)?;
    let refresh = state.sessions.issue_refresh(Cohort::User, &session_id)?;

    let jar = jar
        .add(session_cookie(state, &session_id))
        .add(refresh_cookie(state, &refresh));

    Ok((
        jar,
        LoginFinishResponse {
            sub: user.sub.clone(),
            access_token: session_id,
            refresh_token: refresh,
            otp_required,
        },
    ))
}

// =============================================================================
// Session / logout / refresh
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub otp_required: bool,
    pub otp_verified: bool,
    pub password_reset_required: bool,
}

impl SessionResponse {
    fn anonymous() -> Self {
        Self {
            authenticated: false,
            sub: None,
            email: None,
            name: None,
            otp_required: false,
            otp_verified: false,
            password_reset_required: false,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/user/session",
    tag = "Session",
    responses((status = 200, body = SessionResponse))
)]
async fn get_session(
    State(state): State<AppState>,
    OptionalUserSession(session): OptionalUserSession,
) -> Result<Json<SessionResponse>, ApiError> {
    let Some(session) = session else {
        return Ok(Json(SessionResponse::anonymous()));
    };
    let user = state.users.get(&session.sub)?;
    Ok(Json(SessionResponse {
        authenticated: true,
        sub: Some(user.sub),
        email: Some(user.email),
        name: Some(user.name),
        otp_required: session.data.otp_required,
        otp_verified: session.data.otp_verified,
        password_reset_required: session.data.password_reset_required,
    }))
}

#[utoipa::path(
    post,
    path = "/api/user/logout",
    tag = "Session",
    responses((status = 204))
)]
async fn logout(
    State(state): State<AppState>,
    OptionalUserSession(session): OptionalUserSession,
    jar: CookieJar,
) -> (CookieJar, StatusCode) {
    if let Some(session) = session {
        let _ = state.sessions.delete(Cohort::User, &session.id);
    }
    let jar = jar
        .add(cookies::clear(cookies::USER_SESSION_COOKIE, state.config.is_development).into_owned())
        .add(cookies::clear(cookies::REFRESH_COOKIE, state.config.is_development).into_owned());
    (jar, StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/api/user/refresh-token",
    tag = "Session",
    responses((status = 200, body = RefreshTokenResponse), (status = 401))
)]
async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RefreshTokenResponse>), ApiError> {
    let raw = jar
        .get(cookies::REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| ApiError::unauthorized("refresh token required"))?;

    let session = state.sessions.redeem_refresh(Cohort::User, &raw)?;
    let new_refresh = state.sessions.issue_refresh(Cohort::User, &session.id)?;

    let jar = jar
        .add(session_cookie(&state, &session.id))
        .add(refresh_cookie(&state, &new_refresh));

    Ok((
        jar,
        Json(RefreshTokenResponse {
            access_token: session.id,
            refresh_token: new_refresh,
        }),
    ))
}

// =============================================================================
// OTP
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpStatusResponse {
    pub status: OtpStatus,
}

#[utoipa::path(get, path = "/api/user/otp/status", tag = "OTP", responses((status = 200, body = OtpStatusResponse)))]
async fn otp_status(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<OtpStatusResponse>, ApiError> {
    let status = state
        .otp
        .status(&session.sub)?
        .map(|c| c.status())
        .unwrap_or(OtpStatus::Unset);
    Ok(Json(OtpStatusResponse { status }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OtpSetupInitResponse {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[utoipa::path(post, path = "/api/user/otp/setup/init", tag = "OTP", responses((status = 200, body = OtpSetupInitResponse)))]
async fn otp_setup_init(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<OtpSetupInitResponse>, ApiError> {
    let init = state.otp.setup_init(&session.sub)?;
    Ok(Json(OtpSetupInitResponse {
        secret_base32: init.secret_base32,
        provisioning_uri: init.provisioning_uri,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OtpCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

#[utoipa::path(post, path = "/api/user/otp/setup/verify", tag = "OTP", request_body = OtpCodeRequest, responses((status = 200, body = BackupCodesResponse)))]
async fn otp_setup_verify(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<OtpCodeRequest>,
) -> Result<Json<BackupCodesResponse>, ApiError> {
    let result = state.otp.setup_verify(&session.sub, &req.code);
    let issued = audit::wrap_otp(&state, AuditEventType::OtpEnrolled, &session.sub, result)?;
    state
        .sessions
        .update(Cohort::User, &session.id, |data| {
            data.otp_required = true;
            data.otp_verified = true;
        })?;
    Ok(Json(BackupCodesResponse {
        backup_codes: issued.codes,
    }))
}

#[utoipa::path(post, path = "/api/user/otp/verify", tag = "OTP", request_body = OtpCodeRequest, responses((status = 204), (status = 401), (status = 423)))]
async fn otp_verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    UserSession(session): UserSession,
    Json(req): Json<OtpCodeRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.rate_limiter.check(addr.ip(), &session.sub) {
        return Err(ApiError::rate_limited("too many OTP attempts"));
    }
    let result = state.otp.verify(&session.sub, &req.code);
    audit::wrap_otp_unit(&state, AuditEventType::OtpVerified, &session.sub, result)?;
    state
        .sessions
        .update(Cohort::User, &session.id, |data| data.otp_verified = true)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(post, path = "/api/user/otp/disable", tag = "OTP", request_body = OtpCodeRequest, responses((status = 204)))]
async fn otp_disable(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<OtpCodeRequest>,
) -> Result<StatusCode, ApiError> {
    state.otp.verify(&session.sub, &req.code)?;
    let result = state.otp.disable(&session.sub);
    audit::wrap_otp_unit(&state, AuditEventType::OtpDisabled, &session.sub, result)?;
    state
        .sessions
        .update(Cohort::User, &session.id, |data| {
            data.otp_required = false;
            data.otp_verified = false;
        })?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(post, path = "/api/user/otp/backup-codes/regenerate", tag = "OTP", responses((status = 200, body = BackupCodesResponse)))]
async fn otp_regenerate_backup_codes(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<BackupCodesResponse>, ApiError> {
    let issued = state.otp.regenerate_backup_codes(&session.sub)?;
    Ok(Json(BackupCodesResponse {
        backup_codes: issued.codes,
    }))
}

// =============================================================================
// Password change / recovery
// =============================================================================
//
// Both flows reuse the OPAQUE engine directly rather than duplicating its
// protocol steps: `change/start` and `change/finish` are registration
// against the existing `sub` (overwriting the stored record);
// `change/verify/*` and `recovery/verify/*` are a login exchange against
// the existing record, used purely to mint proof of knowledge of the
// current password before a sensitive mutation is allowed.

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChangeStartRequest {
    pub registration_request: String,
}

#[utoipa::path(post, path = "/api/user/password/change/start", tag = "Password", request_body = PasswordChangeStartRequest, responses((status = 200, body = RegisterStartResponse)))]
async fn password_change_start(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<PasswordChangeStartRequest>,
) -> Result<Json<RegisterStartResponse>, ApiError> {
    let request_bytes = decode_b64("registration_request", &req.registration_request)?;
    let (message, ()) = state
        .opaque_engine
        .register_start(&request_bytes, &session.sub)?;
    let id = state.opaque_sessions.put_registration(session.sub.clone()).await;
    Ok(Json(RegisterStartResponse {
        message: encode_b64(&message),
        server_public_key: id.to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChangeFinishRequest {
    pub server_public_key: String,
    pub registration_upload: String,
    pub reauth_token: String,
}

#[utoipa::path(post, path = "/api/user/password/change/finish", tag = "Password", request_body = PasswordChangeFinishRequest, responses((status = 204)))]
async fn password_change_finish(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<PasswordChangeFinishRequest>,
) -> Result<StatusCode, ApiError> {
    let consumed = state
        .sessions
        .consume_reauth_token(Cohort::User, &session.id, &req.reauth_token)?;
    if !consumed {
        return Err(ApiError::unauthorized("re-authentication required"));
    }

    let id = Uuid::parse_str(&req.server_public_key)
        .map_err(|_| ApiError::invalid_request("invalid server_public_key"))?;
    let pending = state
        .opaque_sessions
        .take_registration(id)
        .await
        .map_err(|_| ApiError::invalid_request("registration session expired or unknown"))?;
    if pending.credential_identifier != session.sub {
        return Err(ApiError::forbidden("registration session belongs to a different account"));
    }

    let upload_bytes = decode_b64("registration_upload", &req.registration_upload)?;
    let password_file = state.opaque_engine.register_finish(&upload_bytes)?;
    let result = state.opaque_records.put(&session.sub, &password_file);
    audit::wrap_opaque_unit(&state, AuditEventType::PasswordChanged, &session.sub, result)?;
    let _ = state.users.set_password_reset_required(&session.sub, false);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyStartRequest {
    pub credential_request: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyStartResponse {
    pub message: String,
    pub session_id: String,
}

#[utoipa::path(post, path = "/api/user/password/change/verify/start", tag = "Password", request_body = VerifyStartRequest, responses((status = 200, body = VerifyStartResponse)))]
async fn password_change_verify_start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    UserSession(session): UserSession,
    Json(req): Json<VerifyStartRequest>,
) -> Result<Json<VerifyStartResponse>, ApiError> {
    if !state.rate_limiter.check(addr.ip(), &session.sub) {
        return Err(ApiError::rate_limited("too many re-verification attempts"));
    }
    let password_file = state
        .opaque_records
        .get(&session.sub)?
        .ok_or_else(|| ApiError::conflict("no password set for this account"))?;
    let request_bytes = decode_b64("credential_request", &req.credential_request)?;
    let (message, server_login_state) = state.opaque_engine.login_start(
        Some(&password_file),
        &request_bytes,
        &session.sub,
    )?;
    let id = state
        .opaque_sessions
        .put_login(session.sub.clone(), server_login_state)
        .await;
    Ok(Json(VerifyStartResponse {
        message: encode_b64(&message),
        session_id: id.to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyFinishRequest {
    pub session_id: String,
    pub credential_finalization: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReauthResponse {
    pub reauth_token: String,
}

#[utoipa::path(post, path = "/api/user/password/change/verify/finish", tag = "Password", request_body = VerifyFinishRequest, responses((status = 200, body = ReauthResponse), (status = 401)))]
async fn password_change_verify_finish(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<VerifyFinishRequest>,
) -> Result<Json<ReauthResponse>, ApiError> {
    let unauthorized = || ApiError::unauthorized("invalid password");
    let id = Uuid::parse_str(&req.session_id).map_err(|_| unauthorized())?;
    let pending = state
        .opaque_sessions
        .take_login(id)
        .await
        .map_err(|_| unauthorized())?;
    if pending.credential_identifier != session.sub {
        return Err(unauthorized());
    }
    let finalization_bytes =
        decode_b64("credential_finalization", &req.credential_finalization).map_err(|_| unauthorized())?;
    state
        .opaque_engine
        .login_finish(&pending.server_login_state, &finalization_bytes)
        .map_err(|_| unauthorized())?;

    let token = state.sessions.issue_reauth_token(Cohort::User, &session.id)?;
    Ok(Json(ReauthResponse { reauth_token: token }))
}

/// Recovery reuses the login-finish path directly: a user who forgot their
/// *new* password but still remembers the old one can prove it here and
/// recover the DRK artifacts before running `password/change/*` again.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecoveryVerifyStartRequest {
    pub email: String,
    pub credential_request: String,
}

#[utoipa::path(post, path = "/api/user/password/recovery/verify/start", tag = "Password", request_body = RecoveryVerifyStartRequest, responses((status = 200, body = LoginStartResponse)))]
async fn password_recovery_verify_start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RecoveryVerifyStartRequest>,
) -> Result<Json<LoginStartResponse>, ApiError> {
    login_start(
        State(state),
        ConnectInfo(addr),
        Json(LoginStartRequest {
            email: req.email,
            credential_request: req.credential_request,
        }),
    )
    .await
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecoveryVerifyFinishRequest {
    pub session_id: String,
    pub sub: String,
    pub credential_finalization: String,
}

#[utoipa::path(post, path = "/api/user/password/recovery/verify/finish", tag = "Password", request_body = RecoveryVerifyFinishRequest, responses((status = 200, body = LoginFinishResponse), (status = 401)))]
async fn password_recovery_verify_finish(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RecoveryVerifyFinishRequest>,
) -> Result<(CookieJar, Json<LoginFinishResponse>), ApiError> {
    let user = perform_login_finish(&state, &req.session_id, &req.sub, &req.credential_finalization).await?;
    let (jar, body) = issue_login_session(&state, jar, &user)?;
    Ok((jar, Json(body)))
}

// =============================================================================
// Crypto / DRK envelope
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct WrappedDrkResponse {
    pub wrapped_drk: Option<String>,
}

#[utoipa::path(get, path = "/api/user/crypto/wrapped-drk", tag = "Crypto", responses((status = 200, body = WrappedDrkResponse)))]
async fn get_wrapped_drk(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<WrappedDrkResponse>, ApiError> {
    let record = state.drk.get(&session.sub)?;
    Ok(Json(WrappedDrkResponse {
        wrapped_drk: record.wrapped_drk.map(|b| encode_b64(&b)),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutWrappedDrkRequest {
    pub wrapped_drk: String,
}

#[utoipa::path(put, path = "/api/user/crypto/wrapped-drk", tag = "Crypto", request_body = PutWrappedDrkRequest, responses((status = 204)))]
async fn put_wrapped_drk(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<PutWrappedDrkRequest>,
) -> Result<StatusCode, ApiError> {
    let bytes = decode_b64("wrapped_drk", &req.wrapped_drk)?;
    state.drk.put_wrapped_drk(&session.sub, bytes)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutEncPubRequest {
    #[schema(value_type = Object)]
    pub enc_public_jwk: Value,
}

#[utoipa::path(put, path = "/api/user/crypto/enc-pub", tag = "Crypto", request_body = PutEncPubRequest, responses((status = 204)))]
async fn put_enc_pub(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<PutEncPubRequest>,
) -> Result<StatusCode, ApiError> {
    state.drk.put_enc_public_jwk(&session.sub, req.enc_public_jwk)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WrappedEncPrivResponse {
    pub wrapped_enc_private_jwk: Option<String>,
}

#[utoipa::path(get, path = "/api/user/crypto/wrapped-enc-priv", tag = "Crypto", responses((status = 200, body = WrappedEncPrivResponse)))]
async fn get_wrapped_enc_priv(
    State(state): State<AppState>,
    UserSession(session): UserSession,
) -> Result<Json<WrappedEncPrivResponse>, ApiError> {
    let record = state.drk.get(&session.sub)?;
    Ok(Json(WrappedEncPrivResponse {
        wrapped_enc_private_jwk: record.wrapped_enc_private_jwk.map(|b| encode_b64(&b)),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutWrappedEncPrivRequest {
    pub wrapped_enc_private_jwk: String,
}

#[utoipa::path(put, path = "/api/user/crypto/wrapped-enc-priv", tag = "Crypto", request_body = PutWrappedEncPrivRequest, responses((status = 204)))]
async fn put_wrapped_enc_priv(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<PutWrappedEncPrivRequest>,
) -> Result<StatusCode, ApiError> {
    let bytes = decode_b64("wrapped_enc_private_jwk", &req.wrapped_enc_private_jwk)?;
    state.drk.put_wrapped_enc_private_jwk(&session.sub, bytes)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Apps / scope descriptions
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct AppSummary {
    pub client_id: String,
    pub name: String,
    pub scopes: Vec<Scope>,
}

#[utoipa::path(get, path = "/api/user/apps", tag = "Apps", responses((status = 200, body = [AppSummary])))]
async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<AppSummary>>, ApiError> {
    let clients = state.clients.list()?;
    Ok(Json(
        clients
            .into_iter()
            .map(|c| AppSummary {
                client_id: c.client_id,
                name: c.name,
                scopes: c.scopes,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ScopeDescriptionsQuery {
    pub client_id: String,
    #[serde(default)]
    pub scopes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScopeDescription {
    pub key: String,
    pub description: Option<String>,
}

#[utoipa::path(get, path = "/api/user/scope-descriptions", tag = "Apps", responses((status = 200, body = [ScopeDescription])))]
async fn scope_descriptions(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ScopeDescriptionsQuery>,
) -> Result<Json<Vec<ScopeDescription>>, ApiError> {
    let client = state.clients.get(&query.client_id)?;
    let requested: Option<Vec<&str>> = query
        .scopes
        .as_deref()
        .map(|s| s.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect());

    let described = client
        .scopes
        .into_iter()
        .filter(|scope| {
            requested
                .as_ref()
                .map(|wanted| wanted.contains(&scope.key()))
                .unwrap_or(true)
        })
        .map(|scope| ScopeDescription {
            key: scope.key().to_string(),
            description: scope.description().map(str::to_string),
        })
        .collect();

    Ok(Json(described))
}

/// Thin audit-logging adapters. [`crate::audit::wrap`] requires `E: Display`,
/// which the feature-module error enums satisfy but `ApiError` does not —
/// these wrap the underlying typed error, record the event, then convert.
mod audit {
    use super::*;
    use crate::opaque::OpaqueError;
    use crate::otp::{BackupCodesIssued, OtpError};
    use crate::users::UserError;

    pub fn wrap_user(
        state: &AppState,
        event_type: AuditEventType,
        sub: Option<&str>,
        result: Result<User, UserError>,
    ) -> Result<User, ApiError> {
        crate::audit::wrap(&state.json_store, event_type, sub, result).map_err(ApiError::from)
    }

    pub fn wrap_otp(
        state: &AppState,
        event_type: AuditEventType,
        sub: &str,
        result: Result<BackupCodesIssued, OtpError>,
    ) -> Result<BackupCodesIssued, ApiError> {
        crate::audit::wrap(&state.json_store, event_type, Some(sub), result).map_err(ApiError::from)
    }

    pub fn wrap_otp_unit(
        state: &AppState,
        event_type: AuditEventType,
        sub: &str,
        result: Result<(), OtpError>,
    ) -> Result<(), ApiError> {
        crate::audit::wrap(&state.json_store, event_type, Some(sub), result).map_err(ApiError::from)
    }

    pub fn wrap_opaque_unit(
        state: &AppState,
        event_type: AuditEventType,
        sub: &str,
        result: Result<(), OpaqueError>,
    ) -> Result<(), ApiError> {
        crate::audit::wrap(&state.json_store, event_type, Some(sub), result).map_err(ApiError::from)
    }

    pub fn record(
        state: &AppState,
        event_type: AuditEventType,
        sub: Option<&str>,
        client_id: Option<&str>,
        success: bool,
        error: Option<&str>,
    ) {
        let mut event = crate::audit::AuditEvent::new(event_type);
        if let Some(sub) = sub {
            event = event.with_sub(sub);
        }
        if let Some(client_id) = client_id {
            event = event.with_client(client_id);
        }
        if !success {
            event = event.failed(error.unwrap_or("unknown error"));
        }
        if let Err(e) = AuditLog::new(&state.json_store).record(&event) {
            tracing::warn!(error = %e, "failed to persist audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_sub_is_deterministic_for_same_email() {
        let a = pseudo_sub("auth.example.com", "Alice@Example.com");
        let b = pseudo_sub("auth.example.com", "alice@example.com");
        assert_eq!(a, b);
        assert!(a.starts_with("anon_"));
    }

    #[test]
    fn pseudo_sub_differs_across_emails() {
        let a = pseudo_sub("auth.example.com", "alice@example.com");
        let b = pseudo_sub("auth.example.com", "bob@example.com");
        assert_ne!(a, b);
    }
}
