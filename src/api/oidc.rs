// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OIDC Authorization-Code Flow
//!
//! The three endpoints an RP-side OAuth client actually talks to:
//! `GET /authorize` to start a request, `POST /authorize/finalize` for the
//! logged-in browser to approve or deny it, and `POST /token` to redeem
//! the resulting code (or a refresh token) for a signed access/ID token
//! pair. Discovery and the public JWKS document round out the set a
//! standard OIDC client library expects to find unauthenticated.
//!
//! Zero-knowledge delivery (`zk_pub`/`drk_hash`/`drk_jwe`) rides alongside
//! the standard flow rather than replacing it: a client that registered a
//! ZK public key gets its wrapped data-recovery key back in the
//! authorization response fragment, independent of the token exchange.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::authorize::NewAuthorizeRequest;
use crate::clients::StoredClient;
use crate::error::ApiError;
use crate::models::{OidcDiscoveryDocument, Scope};
use crate::session::{Cohort, UserSession};
use crate::state::AppState;
use crate::users::User;

const ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;
const ID_TOKEN_TTL_SECONDS: i64 = 3600;
const FRAGMENT_JWE_DELIVERY: &str = "fragment-jwe";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(authorize_start))
        .route("/authorize/finalize", post(authorize_finalize))
        .route("/token", post(token))
        .route("/token/introspect", post(introspect))
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/.well-known/jwks.json", get(jwks_json))
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct AuthorizeQuery {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub zk_pub: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeStartResponse {
    pub request_id: String,
    pub client_id: String,
    pub client_name: String,
    pub scopes: Vec<Scope>,
    pub redirect_uri: String,
    pub has_zk: bool,
}

/// Validate the client, redirect URI, and PKCE requirement, then open a
/// pending authorize request for the browser to approve or deny.
#[utoipa::path(
    get,
    path = "/authorize",
    tag = "OIDC",
    params(AuthorizeQuery),
    responses(
        (status = 200, description = "Pending authorize request", body = AuthorizeStartResponse),
        (status = 400, description = "Unknown client, bad redirect_uri, or missing PKCE")
    )
)]
async fn authorize_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizeStartResponse>, ApiError> {
    if query.response_type != "code" {
        return Err(ApiError::invalid_request("response_type must be code"));
    }
    let client = state.clients.get(&query.client_id)?;
    if !client.redirect_uris.iter().any(|uri| uri == &query.redirect_uri) {
        return Err(ApiError::invalid_request("redirect_uri is not registered for this client"));
    }
    if let Some(challenge) = &query.code_challenge {
        if query.code_challenge_method.as_deref() != Some("S256") {
            return Err(ApiError::invalid_request("code_challenge_method must be S256"));
        }
        let _ = challenge;
    } else if client.require_pkce {
        return Err(ApiError::invalid_request("this client requires a PKCE code_challenge"));
    }

    let is_fragment_jwe_client = client.zk_delivery.as_deref() == Some(FRAGMENT_JWE_DELIVERY);
    if query.zk_pub.is_some() && !is_fragment_jwe_client {
        return Err(ApiError::invalid_request(
            "zk_pub is only accepted for clients registered for fragment-jwe delivery",
        ));
    }
    let has_zk = is_fragment_jwe_client && query.zk_pub.is_some();
    if has_zk {
        let origin = headers
            .get(header::ORIGIN)
            .or_else(|| headers.get(header::REFERER))
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::invalid_request("Origin or Referer header required for zero-knowledge delivery"))?;
        if !zk_origin_allowed(&client.allowed_zk_origins, origin) {
            return Err(ApiError::invalid_request("origin is not allowed for this client's zero-knowledge delivery"));
        }
    }

    let scopes = query
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(|k| Scope::Simple(k.to_string())).collect())
        .unwrap_or_default();

    let request = state.authorize.start(NewAuthorizeRequest {
        client_id: client.client_id.clone(),
        redirect_uri: query.redirect_uri,
        scopes,
        code_challenge: query.code_challenge,
        code_challenge_method: query.code_challenge_method,
        has_zk,
        zk_pub: query.zk_pub,
        state: query.state,
    })?;

    Ok(Json(AuthorizeStartResponse {
        request_id: request.request_id,
        client_id: client.client_id,
        client_name: client.name,
        scopes: request.scopes,
        redirect_uri: request.redirect_uri,
        has_zk: request.has_zk,
    }))
}

/// Compare an `Origin`/`Referer` header value against a client's registered
/// origin allowlist by scheme/host/port, falling back to a literal prefix
/// match for allowlist entries that aren't themselves parseable URLs.
fn zk_origin_allowed(allowed_origins: &[String], value: &str) -> bool {
    let parsed_value = url::Url::parse(value).ok();
    allowed_origins.iter().any(|allowed| {
        match (&parsed_value, url::Url::parse(allowed)) {
            (Some(value_url), Ok(allowed_url)) => {
                value_url.scheme() == allowed_url.scheme()
                    && value_url.host_str() == allowed_url.host_str()
                    && value_url.port_or_known_default() == allowed_url.port_or_known_default()
            }
            _ => value == allowed || value.starts_with(allowed.as_str()),
        }
    })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeFinalizeRequest {
    pub request_id: String,
    pub approve: bool,
    #[serde(default)]
    pub drk_hash: Option<String>,
    #[serde(default)]
    pub drk_jwe: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthorizeFinalizeResponse {
    pub redirect_uri: String,
}

/// Approve or deny a pending authorize request. Requires a logged-in user
/// session with a clean OTP/password-reset posture — an authorize cannot
/// complete while a second factor or forced password change is pending.
#[utoipa::path(
    post,
    path = "/authorize/finalize",
    tag = "OIDC",
    request_body = AuthorizeFinalizeRequest,
    responses(
        (status = 200, description = "Redirect target carrying the code or error", body = AuthorizeFinalizeResponse),
        (status = 401, description = "No session"),
        (status = 403, description = "OTP or password reset still pending"),
        (status = 409, description = "Request already finalized")
    )
)]
async fn authorize_finalize(
    State(state): State<AppState>,
    UserSession(session): UserSession,
    Json(req): Json<AuthorizeFinalizeRequest>,
) -> Result<Json<AuthorizeFinalizeResponse>, ApiError> {
    if session.data.password_reset_required {
        return Err(ApiError::forbidden("password reset required before authorizing a client"));
    }
    if session.data.otp_required && !session.data.otp_verified {
        return Err(ApiError::forbidden("OTP verification required before authorizing a client"));
    }

    let result = state.authorize.finalize(
        &req.request_id,
        &session.sub,
        &session.id,
        req.approve,
        req.drk_hash,
        req.drk_jwe,
    );
    let request = crate::audit::wrap(
        &state.json_store,
        crate::audit::AuditEventType::AuthorizeFinalized,
        Some(&session.sub),
        result,
    )?;

    let redirect_uri = build_redirect_uri(&request.redirect_uri, request.code.as_deref(), request.state.as_deref())?;
    Ok(Json(AuthorizeFinalizeResponse { redirect_uri }))
}

fn build_redirect_uri(
    redirect_uri: &str,
    code: Option<&str>,
    oauth_state: Option<&str>,
) -> Result<String, ApiError> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|_| ApiError::internal("stored redirect_uri failed to parse"))?;
    {
        let mut pairs = url.query_pairs_mut();
        match code {
            Some(code) => {
                pairs.append_pair("code", code);
            }
            None => {
                pairs.append_pair("error", "access_denied");
            }
        }
        if let Some(oauth_state) = oauth_state {
            pairs.append_pair("state", oauth_state);
        }
    }
    Ok(url.to_string())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    iss: String,
    aud: String,
    iat: usize,
    exp: usize,
    scope: String,
    /// The browser session this token is bound to. [`introspect`] checks
    /// this against the live session table, so deleting the session takes
    /// effect on the access token immediately rather than waiting out the
    /// JWT's `exp`.
    sid: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdClaims {
    sub: String,
    iss: String,
    aud: String,
    iat: usize,
    exp: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drk_hash: Option<String>,
}

/// Exchange an authorization code or refresh token for an access token
/// (and, for `authorization_code` with the `openid` scope, an ID token).
#[utoipa::path(
    post,
    path = "/token",
    tag = "OIDC",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token response", body = TokenResponse),
        (status = 400, description = "Invalid grant, code, or PKCE verifier"),
        (status = 401, description = "Client authentication failed")
    )
)]
async fn token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let client = state.clients.get(&req.client_id)?;
    authenticate_client(&state, &client, req.client_secret.as_deref())?;

    match req.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, &client, req).await,
        "refresh_token" => refresh_token_grant(&state, &client, req).await,
        other => Err(ApiError::invalid_request(format!("unsupported grant_type: {other}"))),
    }
}

fn authenticate_client(
    state: &AppState,
    client: &StoredClient,
    presented_secret: Option<&str>,
) -> Result<(), ApiError> {
    if client.token_endpoint_auth_method == "none" {
        return Ok(());
    }
    let expected = state
        .clients
        .reveal_secret(client)
        .ok_or_else(|| ApiError::internal("client secret unavailable"))?;
    let presented = presented_secret.ok_or_else(|| ApiError::unauthorized("client authentication required"))?;
    if presented.as_bytes() != expected.as_slice() {
        return Err(ApiError::unauthorized("invalid client credentials"));
    }
    Ok(())
}

async fn authorization_code_grant(
    state: &AppState,
    client: &StoredClient,
    req: TokenRequest,
) -> Result<Json<TokenResponse>, ApiError> {
    let code = req.code.ok_or_else(|| ApiError::invalid_request("code is required"))?;
    let redirect_uri = req
        .redirect_uri
        .ok_or_else(|| ApiError::invalid_request("redirect_uri is required"))?;

    let request = state.authorize.redeem_code(&code)?;
    if request.client_id != client.client_id {
        return Err(ApiError::invalid_request("code was not issued to this client"));
    }
    if request.redirect_uri != redirect_uri {
        return Err(ApiError::invalid_request("redirect_uri does not match the authorize request"));
    }
    if let Some(challenge) = &request.code_challenge {
        let verifier = req
            .code_verifier
            .ok_or_else(|| ApiError::invalid_request("code_verifier is required"))?;
        verify_pkce(challenge, request.code_challenge_method.as_deref(), &verifier)?;
    }

    let sub = request.sub.ok_or_else(|| ApiError::internal("authorized request is missing its sub"))?;
    let session_id = request
        .session_id
        .ok_or_else(|| ApiError::internal("authorized request is missing its approving session"))?;
    let user = state.users.get(&sub)?;
    let scope = request.scopes.iter().map(Scope::key).collect::<Vec<_>>().join(" ");
    let include_id_token = scope.split_whitespace().any(|s| s == "openid");
    let wants_offline_access = scope.split_whitespace().any(|s| s == "offline_access");
    let refresh_token = wants_offline_access
        .then(|| {
            state.sessions.issue_refresh_with_ttl(
                Cohort::User,
                &session_id,
                chrono::Duration::seconds(client.refresh_token_lifetime_s),
            )
        })
        .transpose()?;

    let drk_hash = request.has_zk.then_some(request.drk_hash).flatten();
    mint_tokens(state, client, &user, &scope, &session_id, include_id_token, drk_hash, refresh_token)
}

async fn refresh_token_grant(
    state: &AppState,
    client: &StoredClient,
    req: TokenRequest,
) -> Result<Json<TokenResponse>, ApiError> {
    let raw = req
        .refresh_token
        .ok_or_else(|| ApiError::invalid_request("refresh_token is required"))?;
    let session = state.sessions.redeem_refresh(Cohort::User, &raw)?;
    let new_refresh = state.sessions.issue_refresh_with_ttl(
        Cohort::User,
        &session.id,
        chrono::Duration::seconds(client.refresh_token_lifetime_s),
    )?;
    let user = state.users.get(&session.sub)?;
    mint_tokens(state, client, &user, "openid profile email", &session.id, true, None, Some(new_refresh))
}

fn verify_pkce(challenge: &str, method: Option<&str>, verifier: &str) -> Result<(), ApiError> {
    if method != Some("S256") {
        return Err(ApiError::invalid_request("only the S256 code_challenge_method is supported"));
    }
    let digest = Sha256::digest(verifier.as_bytes());
    let computed = base64ct::Base64UrlUnpadded::encode_string(&digest);
    if computed != challenge {
        return Err(ApiError::invalid_request("code_verifier does not match code_challenge"));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn mint_tokens(
    state: &AppState,
    client: &StoredClient,
    user: &User,
    scope: &str,
    session_id: &str,
    include_id_token: bool,
    drk_hash: Option<String>,
    refresh_token: Option<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    let now = Utc::now();
    let access_claims = AccessClaims {
        sub: user.sub.clone(),
        iss: state.config.issuer.clone(),
        aud: client.client_id.clone(),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::seconds(ACCESS_TOKEN_TTL_SECONDS)).timestamp() as usize,
        scope: scope.to_string(),
        sid: session_id.to_string(),
    };
    let access_token = state.jwks.sign(&access_claims)?;

    let id_token = if include_id_token {
        let wants_email = scope.split_whitespace().any(|s| s == "email");
        let wants_profile = scope.split_whitespace().any(|s| s == "profile");
        let claims = IdClaims {
            sub: user.sub.clone(),
            iss: state.config.issuer.clone(),
            aud: client.client_id.clone(),
            iat: now.timestamp() as usize,
            exp: (now + chrono::Duration::seconds(ID_TOKEN_TTL_SECONDS)).timestamp() as usize,
            email: wants_email.then(|| user.email.clone()),
            email_verified: wants_email.then_some(user.email_verified),
            name: wants_profile.then(|| user.name.clone()),
            drk_hash,
        };
        Some(state.jwks.sign(&claims)?)
    } else {
        None
    };

    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ACCESS_TOKEN_TTL_SECONDS,
        id_token,
        refresh_token,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectRequest {
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
}

/// RFC 7662-style introspection. An access token's signature and `exp` only
/// prove it was minted by this server — they say nothing about whether the
/// session backing it still exists. Callers that need revocation to take
/// effect immediately (rather than waiting out `ACCESS_TOKEN_TTL_SECONDS`)
/// call this instead of trusting the JWT alone.
#[utoipa::path(
    post,
    path = "/token/introspect",
    tag = "OIDC",
    request_body = IntrospectRequest,
    responses((status = 200, description = "Token activity per RFC 7662", body = IntrospectResponse))
)]
async fn introspect(
    State(state): State<AppState>,
    Json(req): Json<IntrospectRequest>,
) -> Json<IntrospectResponse> {
    let inactive = IntrospectResponse { active: false, sub: None, scope: None, exp: None };
    let Ok(claims) = state.jwks.verify::<AccessClaims>(&req.token) else {
        return Json(inactive);
    };
    match state.sessions.get(Cohort::User, &claims.sid) {
        Ok(_) => Json(IntrospectResponse {
            active: true,
            sub: Some(claims.sub),
            scope: Some(claims.scope),
            exp: Some(claims.exp),
        }),
        Err(_) => Json(inactive),
    }
}

/// OIDC discovery document, built from the running `Config` rather than
/// hardcoded, so a server with a custom `ISSUER` advertises itself
/// correctly.
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = "OIDC",
    responses((status = 200, description = "Discovery document", body = OidcDiscoveryDocument))
)]
async fn discovery(State(state): State<AppState>) -> Json<OidcDiscoveryDocument> {
    let issuer = state.config.issuer.clone();
    Json(OidcDiscoveryDocument {
        authorization_endpoint: format!("{issuer}/authorize"),
        token_endpoint: format!("{issuer}/token"),
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        issuer,
        scopes_supported: vec!["openid".into(), "profile".into(), "email".into(), "offline_access".into()],
        response_types_supported: vec!["code".into()],
        grant_types_supported: vec!["authorization_code".into(), "refresh_token".into()],
        token_endpoint_auth_methods_supported: vec!["none".into(), "client_secret_basic".into()],
        id_token_signing_alg_values_supported: vec!["EdDSA".into()],
        code_challenge_methods_supported: vec!["S256".into()],
    })
}

#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = "OIDC",
    responses((status = 200, description = "Public signing keys as a JWK set"))
)]
async fn jwks_json(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.jwks.public_jwks()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_s256_accepts_matching_verifier() {
        let verifier = "a-pkce-verifier-of-sufficient-length-1234567890";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64ct::Base64UrlUnpadded::encode_string(&digest);
        assert!(verify_pkce(&challenge, Some("S256"), verifier).is_ok());
    }

    #[test]
    fn pkce_s256_rejects_mismatched_verifier() {
        let digest = Sha256::digest(b"correct-verifier");
        let challenge = base64ct::Base64UrlUnpadded::encode_string(&digest);
        assert!(verify_pkce(&challenge, Some("S256"), "wrong-verifier").is_err());
    }

    #[test]
    fn pkce_rejects_plain_method() {
        assert!(verify_pkce("same-value", Some("plain"), "same-value").is_err());
    }

    #[test]
    fn pkce_rejects_missing_method() {
        let digest = Sha256::digest(b"verifier");
        let challenge = base64ct::Base64UrlUnpadded::encode_string(&digest);
        assert!(verify_pkce(&challenge, None, "verifier").is_err());
    }

    #[test]
    fn redirect_uri_carries_code_and_state() {
        let url = build_redirect_uri("https://app/cb", Some("abc123"), Some("xyz")).unwrap();
        assert!(url.contains("code=abc123"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn redirect_uri_carries_denial_error() {
        let url = build_redirect_uri("https://app/cb", None, None).unwrap();
        assert!(url.contains("error=access_denied"));
    }

    #[test]
    fn zk_origin_allowed_matches_scheme_host_port() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(zk_origin_allowed(&allowed, "https://app.example.com"));
        assert!(zk_origin_allowed(&allowed, "https://app.example.com/callback"));
        assert!(!zk_origin_allowed(&allowed, "https://evil.example.com"));
        assert!(!zk_origin_allowed(&allowed, "http://app.example.com"));
    }

    #[test]
    fn zk_origin_rejects_unlisted_origin() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(!zk_origin_allowed(&allowed, "https://not-app.example.com"));
    }
}
