// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `FromRequestParts` extractors binding a request to its session cookie.
//! `UserSession` only ever accepts `__Host-DarkAuth`; `AdminSession` only
//! ever accepts `__Host-DarkAuth-Admin` — a cookie from the wrong cohort is
//! rejected as `Unauthorized` rather than silently falling through to the
//! other cohort's permissions.

use std::ops::Deref;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use crate::error::ApiError;
use crate::state::AppState;

use super::cookies::{ADMIN_SESSION_COOKIE, USER_SESSION_COOKIE};
use super::store::{Cohort, Session};

/// An authenticated end-user session, bound to `__Host-DarkAuth`.
pub struct UserSession(pub Session);

/// An authenticated admin session, bound to `__Host-DarkAuth-Admin`.
pub struct AdminSession(pub Session);

impl Deref for UserSession {
    type Target = Session;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for AdminSession {
    type Target = Session;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn unauthorized() -> ApiError {
    ApiError::unauthorized("session required")
}

impl<S> FromRequestParts<S> for UserSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = jar.get(USER_SESSION_COOKIE).ok_or_else(unauthorized)?;
        let session = app_state
            .sessions
            .get(Cohort::User, cookie.value())
            .map_err(|_| unauthorized())?;
        Ok(UserSession(session))
    }
}

impl<S> FromRequestParts<S> for AdminSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let cookie = jar.get(ADMIN_SESSION_COOKIE).ok_or_else(unauthorized)?;
        let session = app_state
            .sessions
            .get(Cohort::Admin, cookie.value())
            .map_err(|_| unauthorized())?;
        Ok(AdminSession(session))
    }
}

/// Like [`UserSession`], but missing/invalid cookies yield `None` instead
/// of rejecting the request. Used by endpoints that behave differently for
/// authenticated vs. anonymous callers (`GET /apps`).
pub struct OptionalUserSession(pub Option<Session>);

impl<S> FromRequestParts<S> for OptionalUserSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match UserSession::from_request_parts(parts, state).await {
            Ok(UserSession(session)) => Ok(OptionalUserSession(Some(session))),
            Err(_) => Ok(OptionalUserSession(None)),
        }
    }
}
