// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Admin API
//!
//! Everything that manages the identity provider itself rather than an
//! end user's own account: OAuth client registration, signing-key
//! rotation, OTP lockout recovery, the user directory, and audit log
//! queries. Gated by `AdminSession`, which only ever accepts the
//! `__Host-DarkAuth-Admin` cookie — a regular user session never reaches
//! these handlers.
//!
//! Admin login reuses the same OPAQUE password file and `User` row as the
//! end-user API; what makes an account an admin is solely membership in
//! `Config::admin_emails`, checked again at finish time in case the
//! allowlist changed between the two OPAQUE round trips.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use base64ct::Encoding;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::clients::{ClientInput, ClientType, StoredClient};
use crate::error::ApiError;
use crate::models::{Scope, SessionData};
use crate::session::{cookies, AdminSession, Cohort};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/opaque/login/start", post(login_start))
        .route("/opaque/login/finish", post(login_finish))
        .route("/session", get(get_session))
        .route("/logout", post(logout))
        .route("/clients", get(list_clients).post(create_client))
        .route(
            "/clients/{client_id}",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/jwks/rotate", post(rotate_jwks))
        .route("/users", get(list_users))
        .route("/users/{sub}/otp/unlock", post(unlock_otp))
        .route("/audit/events", get(audit_events))
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    base64ct::Base64UrlUnpadded::decode_vec(value)
        .map_err(|_| ApiError::invalid_request(format!("{field} is not valid base64url")))
}

fn encode_b64(bytes: &[u8]) -> String {
    base64ct::Base64UrlUnpadded::encode_string(bytes)
}

fn is_admin_email(state: &AppState, email: &str) -> bool {
    let email = email.to_ascii_lowercase();
    state.config.admin_emails.iter().any(|e| *e == email)
}

// =============================================================================
// Admin login
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminLoginStartRequest {
    pub email: String,
    pub credential_request: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminLoginStartResponse {
    pub message: String,
    pub session_id: String,
}

/// Step 1 of admin login: same OPAQUE credential-request exchange as the
/// user-facing login, but rejected up front for any email not on the
/// admin allowlist.
#[utoipa::path(
    post,
    path = "/api/admin/opaque/login/start",
    tag = "Admin Auth",
    request_body = AdminLoginStartRequest,
    responses(
        (status = 200, description = "OPAQUE login challenge", body = AdminLoginStartResponse),
        (status = 403, description = "Not an administrator account"),
        (status = 429, description = "Rate limited")
    )
)]
async fn login_start(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<AdminLoginStartRequest>,
) -> Result<Json<AdminLoginStartResponse>, ApiError> {
    let email = req.email.trim().to_ascii_lowercase();
    if !is_admin_email(&state, &email) {
        return Err(ApiError::forbidden("not an administrator account"));
    }
    if !state.rate_limiter.check(addr.ip(), &email) {
        return Err(ApiError::rate_limited("too many login attempts"));
    }

    let user = state
        .users
        .find_by_email(&email)?
        .ok_or_else(|| ApiError::unauthorized("invalid email or password"))?;
    let password_file = state
        .opaque_records
        .get(&user.sub)?
        .ok_or_else(|| ApiError::unauthorized("invalid email or password"))?;

    let request_bytes = decode_b64("credential_request", &req.credential_request)?;
    let (message, server_login_state) =
        state.opaque_engine.login_start(Some(&password_file), &request_bytes, &email)?;
    let session_id = state.opaque_sessions.put_login(email, server_login_state).await;

    Ok(Json(AdminLoginStartResponse {
        message: encode_b64(&message),
        session_id: session_id.to_string(),
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminLoginFinishRequest {
    pub session_id: String,
    pub credential_finalization: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminLoginFinishResponse {
    pub sub: String,
}

/// Step 2 of admin login: verify the 3DH finalization, re-check the
/// allowlist (it may have changed since `login_start`), and mint a
/// `Cohort::Admin` session.
#[utoipa::path(
    post,
    path = "/api/admin/opaque/login/finish",
    tag = "Admin Auth",
    request_body = AdminLoginFinishRequest,
    responses(
        (status = 200, description = "Admin session established", body = AdminLoginFinishResponse),
        (status = 401, description = "Invalid credentials or session"),
        (status = 403, description = "Not an administrator account")
    )
)]
async fn login_finish(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<AdminLoginFinishRequest>,
) -> Result<(CookieJar, Json<AdminLoginFinishResponse>), ApiError> {
    let unauthorized = || ApiError::unauthorized("invalid email or password");

    let id = Uuid::parse_str(&req.session_id).map_err(|_| unauthorized())?;
    let pending = state.opaque_sessions.take_login(id).await.map_err(|_| unauthorized())?;
    let finalization_bytes =
        decode_b64("credential_finalization", &req.credential_finalization).map_err(|_| unauthorized())?;
    state
        .opaque_engine
        .login_finish(&pending.server_login_state, &finalization_bytes)
        .map_err(|_| unauthorized())?;

    let user = state
        .users
        .find_by_email(&pending.credential_identifier)
        .map_err(|_| unauthorized())?
        .ok_or_else(unauthorized)?;

    if !is_admin_email(&state, &user.email) {
        record(&state, AuditEventType::LoginFailure, Some(&user.sub), false, Some("not an administrator"));
        return Err(ApiError::forbidden("not an administrator account"));
    }

    let data = SessionData {
        admin_role: Some("admin".to_string()),
        ..Default::default()
    };
    let session_id = state.sessions.create(Cohort::Admin, &user.sub, data)?;
    record(&state, AuditEventType::LoginSuccess, Some(&user.sub), true, None);

    let jar = jar.add(cookies::build(
        cookies::ADMIN_SESSION_COOKIE,
        session_id,
        state.config.is_development,
        None,
    ).into_owned());

    Ok((jar, Json(AdminLoginFinishResponse { sub: user.sub })))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminSessionResponse {
    pub sub: String,
    pub email: String,
    pub name: String,
}

#[utoipa::path(
    get,
    path = "/api/admin/session",
    tag = "Admin Auth",
    security(("admin_session" = [])),
    responses((status = 200, body = AdminSessionResponse), (status = 401))
)]
async fn get_session(
    State(state): State<AppState>,
    AdminSession(session): AdminSession,
) -> Result<Json<AdminSessionResponse>, ApiError> {
    let user = state.users.get(&session.sub)?;
    Ok(Json(AdminSessionResponse {
        sub: user.sub,
        email: user.email,
        name: user.name,
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/logout",
    tag = "Admin Auth",
    security(("admin_session" = [])),
    responses((status = 204))
)]
async fn logout(State(state): State<AppState>, AdminSession(session): AdminSession, jar: CookieJar) -> (CookieJar, StatusCode) {
    let _ = state.sessions.delete(Cohort::Admin, &session.id);
    let jar = jar.add(cookies::clear(cookies::ADMIN_SESSION_COOKIE, state.config.is_development).into_owned());
    (jar, StatusCode::NO_CONTENT)
}

// =============================================================================
// Clients
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClientWriteRequest {
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub require_pkce: bool,
    pub token_endpoint_auth_method: String,
    #[serde(default)]
    pub refresh_token_lifetime_s: Option<i64>,
    #[serde(default)]
    pub zk_delivery: Option<String>,
    #[serde(default)]
    pub allowed_zk_origins: Vec<String>,
}

impl From<ClientWriteRequest> for ClientInput {
    fn from(req: ClientWriteRequest) -> Self {
        ClientInput {
            name: req.name,
            client_type: req.client_type,
            redirect_uris: req.redirect_uris,
            scopes: req.scopes,
            require_pkce: req.require_pkce,
            token_endpoint_auth_method: req.token_endpoint_auth_method,
            refresh_token_lifetime_s: req.refresh_token_lifetime_s,
            zk_delivery: req.zk_delivery,
            allowed_zk_origins: req.allowed_zk_origins,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClientResponse {
    pub client_id: String,
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<Scope>,
    pub require_pkce: bool,
    pub token_endpoint_auth_method: String,
    pub refresh_token_lifetime_s: i64,
    pub zk_delivery: Option<String>,
    pub allowed_zk_origins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

fn to_response(state: &AppState, client: StoredClient, reveal: bool) -> ClientResponse {
    let client_secret = if reveal {
        state.clients.reveal_secret(&client).map(|bytes| encode_b64(&bytes))
    } else {
        None
    };
    ClientResponse {
        client_id: client.client_id,
        name: client.name,
        client_type: client.client_type,
        redirect_uris: client.redirect_uris,
        scopes: client.scopes,
        require_pkce: client.require_pkce,
        token_endpoint_auth_method: client.token_endpoint_auth_method,
        refresh_token_lifetime_s: client.refresh_token_lifetime_s,
        zk_delivery: client.zk_delivery,
        allowed_zk_origins: client.allowed_zk_origins,
        client_secret,
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/clients",
    tag = "Admin Clients",
    security(("admin_session" = [])),
    responses((status = 200, body = Vec<ClientResponse>))
)]
async fn list_clients(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Vec<ClientResponse>>, ApiError> {
    let clients = state.clients.list()?;
    Ok(Json(clients.into_iter().map(|c| to_response(&state, c, false)).collect()))
}

/// Create a client. The secret (if any) is revealed once, in this
/// response only — it is never returned by a later `GET`.
#[utoipa::path(
    post,
    path = "/api/admin/clients",
    tag = "Admin Clients",
    security(("admin_session" = [])),
    request_body = ClientWriteRequest,
    responses((status = 200, body = ClientResponse))
)]
async fn create_client(
    State(state): State<AppState>,
    admin: AdminSession,
    Json(req): Json<ClientWriteRequest>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.clients.create(req.into())?;
    record(&state, AuditEventType::AdminClientCreated, Some(&admin.sub), true, None);
    Ok(Json(to_response(&state, client, true)))
}

#[utoipa::path(
    get,
    path = "/api/admin/clients/{client_id}",
    tag = "Admin Clients",
    security(("admin_session" = [])),
    responses((status = 200, body = ClientResponse), (status = 404))
)]
async fn get_client(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(client_id): Path<String>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.clients.get(&client_id)?;
    Ok(Json(to_response(&state, client, false)))
}

#[utoipa::path(
    put,
    path = "/api/admin/clients/{client_id}",
    tag = "Admin Clients",
    security(("admin_session" = [])),
    request_body = ClientWriteRequest,
    responses((status = 200, body = ClientResponse), (status = 404))
)]
async fn update_client(
    State(state): State<AppState>,
    admin: AdminSession,
    Path(client_id): Path<String>,
    Json(req): Json<ClientWriteRequest>,
) -> Result<Json<ClientResponse>, ApiError> {
    let client = state.clients.update(&client_id, req.into())?;
    record(&state, AuditEventType::AdminClientUpdated, Some(&admin.sub), true, None);
    Ok(Json(to_response(&state, client, false)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/clients/{client_id}",
    tag = "Admin Clients",
    security(("admin_session" = [])),
    responses((status = 204), (status = 404))
)]
async fn delete_client(
    State(state): State<AppState>,
    admin: AdminSession,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.clients.delete(&client_id)?;
    record(&state, AuditEventType::AdminClientDeleted, Some(&admin.sub), true, None);
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// JWKS rotation
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct RotateJwksResponse {
    pub kid: String,
}

#[utoipa::path(
    post,
    path = "/api/admin/jwks/rotate",
    tag = "Admin",
    security(("admin_session" = [])),
    responses((status = 200, body = RotateJwksResponse))
)]
async fn rotate_jwks(
    State(state): State<AppState>,
    admin: AdminSession,
) -> Result<Json<RotateJwksResponse>, ApiError> {
    let entry = state.jwks.rotate_keys()?;
    record(&state, AuditEventType::JwksRotated, Some(&admin.sub), true, None);
    Ok(Json(RotateJwksResponse { kid: entry.kid }))
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminUserSummary {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub password_reset_required: bool,
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "Admin Users",
    security(("admin_session" = [])),
    responses((status = 200, body = Vec<AdminUserSummary>))
)]
async fn list_users(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<Vec<AdminUserSummary>>, ApiError> {
    let users = state.users.list()?;
    Ok(Json(
        users
            .into_iter()
            .map(|u| AdminUserSummary {
                sub: u.sub,
                email: u.email,
                name: u.name,
                email_verified: u.email_verified,
                password_reset_required: u.password_reset_required,
            })
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/users/{sub}/otp/unlock",
    tag = "Admin Users",
    security(("admin_session" = [])),
    responses((status = 204), (status = 404))
)]
async fn unlock_otp(
    State(state): State<AppState>,
    admin: AdminSession,
    Path(sub): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.otp.admin_unlock(&sub)?;
    record(&state, AuditEventType::AdminOtpUnlock, Some(&admin.sub), true, None);
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Audit log
// =============================================================================

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct AuditEventsQuery {
    /// UTC date in `YYYY-MM-DD` form; the audit log is one JSONL file per day.
    pub date: String,
}

#[utoipa::path(
    get,
    path = "/api/admin/audit/events",
    tag = "Admin",
    params(AuditEventsQuery),
    security(("admin_session" = [])),
    responses((status = 200, body = Vec<AuditEvent>))
)]
async fn audit_events(
    State(state): State<AppState>,
    _admin: AdminSession,
    Query(query): Query<AuditEventsQuery>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let events = AuditLog::new(&state.json_store).read_day(&query.date)?;
    Ok(Json(events))
}

fn record(state: &AppState, event_type: AuditEventType, sub: Option<&str>, success: bool, error: Option<&str>) {
    crate::audit::record(&state.json_store, event_type, sub, None, success, error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_write_request_maps_to_client_input() {
        let req = ClientWriteRequest {
            name: "app-web".into(),
            client_type: ClientType::Confidential,
            redirect_uris: vec!["https://app/cb".into()],
            scopes: vec![Scope::Simple("profile".into())],
            require_pkce: true,
            token_endpoint_auth_method: "client_secret_basic".into(),
            refresh_token_lifetime_s: None,
            zk_delivery: None,
            allowed_zk_origins: vec![],
        };
        let input: ClientInput = req.into();
        assert_eq!(input.name, "app-web");
        assert_eq!(input.client_type, ClientType::Confidential);
    }

    #[test]
    fn is_admin_email_is_case_insensitive() {
        let mut config = crate::config::Config::default();
        config.admin_emails = vec!["admin@example.com".to_string()];
        let mut state = AppState::default();
        state.config = config;
        assert!(is_admin_email(&state, "Admin@Example.com"));
        assert!(!is_admin_email(&state, "nobody@example.com"));
    }
}
