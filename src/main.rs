// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

mod api;
mod audit;
mod authorize;
mod clients;
mod config;
mod crypto;
mod error;
mod jwks;
mod models;
mod opaque;
mod otp;
mod rate_limit;
mod session;
mod state;
mod storage;
mod users;

#[cfg(not(test))]
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

#[cfg(not(test))]
use api::{admin_router, user_router};
#[cfg(not(test))]
use clients::ClientRegistry;
#[cfg(not(test))]
use config::Config;
#[cfg(not(test))]
use crypto::kek::Kek;
#[cfg(not(test))]
use opaque::OpaqueEngine;
#[cfg(not(test))]
use state::AppState;
#[cfg(not(test))]
use storage::db::{Db, DbError, META};
#[cfg(not(test))]
use storage::json_store::JsonStore;
#[cfg(not(test))]
use storage::paths::StoragePaths;
#[cfg(not(test))]
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
#[cfg(not(test))]
use tracing::info;
#[cfg(not(test))]
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const KEK_SALT_KEY: &str = "kek_salt";
const OPAQUE_SETUP_KEY: &str = "opaque_setup";
const OPAQUE_SETUP_AAD: &[u8] = b"opaque-server-setup";

#[cfg(not(test))]
#[tokio::main]
async fn main() {
    init_tracing();

    let config = Config::from_env();
    info!(user_port = config.user_port, admin_port = config.admin_port, "starting DarkAuth");

    let db = Arc::new(Db::open(std::path::Path::new(&config.database_url)).expect(
        "failed to open redb database at DATABASE_URL",
    ));

    let kek_passphrase = env::var(config::KEK_PASSPHRASE_ENV)
        .expect("KEK_PASSPHRASE must be set — the server cannot start without its key-encryption key");
    let salt = load_or_create_kek_salt(&db).expect("failed to load or create KeK salt");
    let kek = Arc::new(Kek::unlock(&kek_passphrase, &salt).expect("failed to derive KeK"));

    let opaque_engine = Arc::new(
        load_or_create_opaque_engine(&db, &kek).expect("failed to load or create OPAQUE server setup"),
    );

    let mut json_store = JsonStore::new(StoragePaths::new(&config.data_dir));
    json_store
        .initialize()
        .expect("failed to initialize JSON-repository storage");
    let json_store = Arc::new(json_store);

    let clients = Arc::new(
        ClientRegistry::new(&config.data_dir, Some(kek.clone()))
            .expect("failed to open client registry"),
    );

    let state = AppState::new(config.clone(), db, kek, json_store, clients, opaque_engine);
    state.jwks.ensure_key().expect("failed to ensure an active signing key");

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(
            |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = %response.status().as_u16(),
                    latency_ms = %latency.as_millis(),
                    "response"
                );
            },
        );

    let user_app = user_router(state.clone())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(trace_layer.clone());

    let admin_app = admin_router(state.clone())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(trace_layer);

    let host = state.config.host.clone();
    let user_addr: SocketAddr = format!("{host}:{}", state.config.user_port)
        .parse()
        .expect("invalid USER_PORT/HOST combination");
    let admin_addr: SocketAddr = format!("{host}:{}", state.config.admin_port)
        .parse()
        .expect("invalid ADMIN_PORT/HOST combination");

    info!(address = %user_addr, "user API listening");
    info!(address = %admin_addr, "admin API listening");

    let user_server = axum_server::bind(user_addr)
        .serve(user_app.into_make_service_with_connect_info::<SocketAddr>());
    let admin_server = axum_server::bind(admin_addr)
        .serve(admin_app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = user_server => result.expect("user API server failed"),
        result = admin_server => result.expect("admin API server failed"),
    }
}

/// Load the KeK's domain-separation salt from `META`, generating and
/// persisting one on first boot. The salt is not secret; its purpose is
/// separating this server's derived key from any other process that
/// happens to share the same passphrase.
#[cfg(not(test))]
fn load_or_create_kek_salt(db: &Db) -> Result<Vec<u8>, DbError> {
    if let Some(salt) = db.get_bytes(META, KEK_SALT_KEY)? {
        return Ok(salt);
    }
    use rand::RngCore;
    let mut salt = vec![0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    db.put_bytes(META, KEK_SALT_KEY, &salt)?;
    Ok(salt)
}

/// Load the long-lived OPAQUE server setup (keypair + OPRF seed) from
/// `META`, wrapped under the KeK, generating one on first boot. Every
/// registration and login on this server must use the same setup, or
/// previously registered users become unauthenticatable.
#[cfg(not(test))]
fn load_or_create_opaque_engine(
    db: &Db,
    kek: &Kek,
) -> Result<OpaqueEngine, Box<dyn std::error::Error>> {
    if let Some(wrapped) = db.get_bytes(META, OPAQUE_SETUP_KEY)? {
        let bytes = kek.unwrap(OPAQUE_SETUP_AAD, &wrapped)?;
        return Ok(OpaqueEngine::from_bytes(&bytes)?);
    }
    let engine = OpaqueEngine::generate();
    let wrapped = kek.wrap(OPAQUE_SETUP_AAD, &engine.export())?;
    db.put_bytes(META, OPAQUE_SETUP_KEY, &wrapped)?;
    Ok(engine)
}

/// Structured logging: pretty for local development, JSON for anything
/// that ships logs to an aggregator.
#[cfg(not(test))]
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let use_json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
