// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cookie name constants and jar-building helpers for the three cookie
//! cohorts. `Secure` is dropped only in development, since browsers refuse
//! to set a `Secure` cookie over plain HTTP and local dev has no TLS
//! terminator in front of it.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration as CookieDuration;

pub const USER_SESSION_COOKIE: &str = "__Host-DarkAuth";
pub const ADMIN_SESSION_COOKIE: &str = "__Host-DarkAuth-Admin";
pub const REFRESH_COOKIE: &str = "__Host-DarkAuth-Refresh";

/// Build a session cookie. `max_age` is `None` for a session-lifetime
/// cookie (cleared when the browser closes), `Some` for the refresh
/// cookie, which needs to outlive the browser session.
pub fn build<'a>(
    name: &'a str,
    value: String,
    is_development: bool,
    max_age: Option<CookieDuration>,
) -> Cookie<'a> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(!is_development);
    if let Some(age) = max_age {
        cookie.set_max_age(age);
    }
    cookie
}

/// Build the cookie that clears a previously set session cookie by the
/// same name, for logout and OTP-lockout flows.
pub fn clear<'a>(name: &'a str, is_development: bool) -> Cookie<'a> {
    let mut cookie = Cookie::new(name, "");
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(!is_development);
    cookie.set_max_age(CookieDuration::seconds(0));
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_cookie_is_secure() {
        let cookie = build(USER_SESSION_COOKIE, "abc".into(), false, None);
        assert!(cookie.secure().unwrap_or(false));
    }

    #[test]
    fn development_cookie_drops_secure() {
        let cookie = build(USER_SESSION_COOKIE, "abc".into(), true, None);
        assert!(!cookie.secure().unwrap_or(true));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear(ADMIN_SESSION_COOKIE, false);
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(0)));
    }
}
