// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # HTTP API
//!
//! Two separate Axum routers bound on two separate ports, mirroring the
//! trust boundary between end users and operators: [`user_router`] carries
//! everything a browser or OAuth client reaches (OPAQUE auth, the
//! authorization-code flow, the DRK envelope endpoints) and [`admin_router`]
//! carries operator-only endpoints (client registration, key rotation, the
//! audit log). Both serve the same generated OpenAPI document and a Swagger
//! UI mounted at `/docs`.

pub mod admin;
pub mod health;
pub mod oidc;
pub mod user;

use axum::extract::Path;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::Config as SwaggerConfig;

use crate::config::Config;
use crate::state::AppState;

fn docs_router() -> Router<AppState> {
    Router::new()
        .route("/api-doc/openapi.json", get(openapi_json))
        .route("/docs", get(|| async { Redirect::permanent("/docs/") }))
        .route("/docs/", get(swagger_ui_index))
        .route("/docs/{*rest}", get(swagger_ui_asset))
}

/// The user-facing router: OPAQUE registration/login, sessions, OTP,
/// password change/recovery, the DRK crypto envelope, the authorization-code
/// flow, and OIDC/JWKS discovery.
pub fn user_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    Router::new()
        .merge(docs_router())
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .merge(user::routes())
        .merge(oidc::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The operator-facing router: client CRUD, JWKS rotation, OTP unlock, the
/// user directory, and the audit log.
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .merge(docs_router())
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .nest("/api/admin", admin::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn swagger_ui_index() -> Response {
    serve_swagger_ui("index.html")
}

async fn swagger_ui_asset(Path(rest): Path<String>) -> Response {
    serve_swagger_ui(&rest)
}

/// Serve one asset out of the vendored Swagger UI bundle, rewriting
/// `index.html` so its relative asset references resolve under `/docs/`
/// instead of the bundle's default root.
fn serve_swagger_ui(path: &str) -> Response {
    let config = SwaggerConfig::from("/api-doc/openapi.json");
    match utoipa_swagger_ui::serve(path, config.into()) {
        Ok(Some(file)) => {
            let mut data = file.bytes.to_vec();
            if path == "index.html" {
                let html = String::from_utf8_lossy(&data).replacen(
                    "<head>",
                    "<head>\n    <base href=\"/docs/\" />",
                    1,
                );
                data = html.into_bytes();
            }
            ([(axum::http::header::CONTENT_TYPE, file.content_type)], data).into_response()
        }
        Ok(None) => axum::http::StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serve swagger ui asset");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// CORS for the ZK-delivery fragment and any browser-based OAuth client
/// hitting the user API directly. An empty allowlist (the production
/// default) permits no cross-origin reads at all rather than falling back
/// to permissive, since the fragment the identity provider relays can carry
/// a wrapped DRK.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.cors_allowed_origins.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::readiness,
        health::liveness,
        user::register_start,
        user::register_finish,
        user::login_start,
        user::login_finish,
        user::get_session,
        user::logout,
        user::refresh_token,
        user::otp_status,
        user::otp_setup_init,
        user::otp_setup_verify,
        user::otp_verify,
        user::otp_disable,
        user::otp_regenerate_backup_codes,
        user::password_change_start,
        user::password_change_finish,
        user::password_change_verify_start,
        user::password_change_verify_finish,
        user::password_recovery_verify_start,
        user::password_recovery_verify_finish,
        user::get_wrapped_drk,
        user::put_wrapped_drk,
        user::put_enc_pub,
        user::get_wrapped_enc_priv,
        user::put_wrapped_enc_priv,
        user::list_apps,
        user::scope_descriptions,
        oidc::authorize_start,
        oidc::authorize_finalize,
        oidc::token,
        oidc::introspect,
        oidc::discovery,
        oidc::jwks_json,
        admin::login_start,
        admin::login_finish,
        admin::get_session,
        admin::logout,
        admin::list_clients,
        admin::create_client,
        admin::get_client,
        admin::update_client,
        admin::delete_client,
        admin::rotate_jwks,
        admin::list_users,
        admin::unlock_otp,
        admin::audit_events,
    ),
    components(schemas(
        health::ReadyResponse,
        health::HealthChecks,
        health::HealthResponse,
        user::RegisterStartRequest,
        user::RegisterStartResponse,
        user::RegisterFinishRequest,
        user::RegisterFinishResponse,
        user::LoginStartRequest,
        user::LoginStartResponse,
        user::LoginFinishRequest,
        user::LoginFinishResponse,
        user::SessionResponse,
        user::RefreshTokenResponse,
        user::OtpStatusResponse,
        user::OtpSetupInitResponse,
        user::OtpCodeRequest,
        user::BackupCodesResponse,
        user::PasswordChangeStartRequest,
        user::PasswordChangeFinishRequest,
        user::VerifyStartRequest,
        user::VerifyStartResponse,
        user::VerifyFinishRequest,
        user::ReauthResponse,
        user::RecoveryVerifyStartRequest,
        user::RecoveryVerifyFinishRequest,
        user::WrappedDrkResponse,
        user::PutWrappedDrkRequest,
        user::PutEncPubRequest,
        user::WrappedEncPrivResponse,
        user::PutWrappedEncPrivRequest,
        user::AppSummary,
        user::ScopeDescription,
        oidc::AuthorizeStartResponse,
        oidc::AuthorizeFinalizeRequest,
        oidc::AuthorizeFinalizeResponse,
        oidc::TokenResponse,
        oidc::IntrospectRequest,
        oidc::IntrospectResponse,
        admin::AdminLoginStartRequest,
        admin::AdminLoginStartResponse,
        admin::AdminLoginFinishRequest,
        admin::AdminLoginFinishResponse,
        admin::AdminSessionResponse,
        admin::ClientWriteRequest,
        admin::ClientResponse,
        admin::RotateJwksResponse,
        admin::AdminUserSummary,
        crate::clients::ClientType,
        crate::models::Scope,
        crate::audit::AuditEvent,
        crate::audit::AuditEventType,
    )),
    tags(
        (name = "Health", description = "Liveness/readiness probes"),
        (name = "Registration", description = "OPAQUE account registration"),
        (name = "Login", description = "OPAQUE login"),
        (name = "Session", description = "User session lifecycle"),
        (name = "OTP", description = "TOTP second factor"),
        (name = "Password", description = "Password change and recovery"),
        (name = "Crypto", description = "DRK envelope and encryption keypair storage"),
        (name = "Apps", description = "Registered client apps and scope catalog"),
        (name = "OIDC", description = "Authorization-code flow and OIDC discovery"),
        (name = "Admin Auth", description = "Admin session login"),
        (name = "Admin Clients", description = "OAuth client registry management"),
        (name = "Admin Users", description = "User directory and OTP recovery"),
        (name = "Admin", description = "Signing-key rotation and audit log"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "user_session",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("__Host-DarkAuth"))),
        );
        components.add_security_scheme(
            "admin_session",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("__Host-DarkAuth-Admin"))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_router_builds_with_all_routes() {
        let _ = user_router(AppState::default()).into_make_service();
    }

    #[test]
    fn admin_router_builds_with_all_routes() {
        let _ = admin_router(AppState::default()).into_make_service();
    }

    #[tokio::test]
    async fn docs_route_serves_without_redirect() {
        use tower::ServiceExt;

        let app = user_router(AppState::default());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/docs/")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[test]
    fn generate_openapi_json() {
        let json = ApiDoc::openapi().to_pretty_json().unwrap();
        std::fs::write("/tmp/openapi_generated.json", json).unwrap();
    }
}
