//! Cookie handling for the OIDC handshake and the access session.

use core::time::Duration;

use axum_extra::extract::cookie::{Cookie, CookieJar};
use cookie::{SameSite, time::Duration as CookieDuration};
use gcsproxy_common::{TokenError, sign, verify};
use serde::{Deserialize, Serialize};

/// Cookie carrying the signed handshake session between login and callback.
pub(crate) const COOKIE_HANDSHAKE: &str = "_gpso";
/// Cookie carrying the signed access session.
pub(crate) const COOKIE_ACCESS: &str = "_gpsa";

/// Lifetime of a handshake session, in seconds.
pub(crate) const HANDSHAKE_TTL_SECS: i64 = 300;

/// State shared between the login redirect and the provider callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HandshakeSession {
    /// CSRF state echoed back by the provider.
    pub state: String,
    /// Path to return to after login; always starts with `/`.
    pub redirect_url: String,
    pub nonce: String,
    pub pkce_verifier: String,
    pub exp: i64,
}

impl HandshakeSession {
    pub(crate) fn seal(&self, secret: &[u8]) -> Result<String, TokenError> {
        sign(self, secret)
    }

    /// Verifies and decodes a handshake cookie value, rejecting it once expired.
    pub(crate) fn open(token: &str, secret: &[u8], now: i64) -> Result<Self, TokenError> {
        let session: Self = verify(token, secret)?;
        if now >= session.exp {
            return Err(TokenError::Expired);
        }
        Ok(session)
    }
}

fn session_cookie(
    name: &'static str,
    value: String,
    secure: bool,
    max_age: CookieDuration,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        // Lax, so the cookie survives the top-level redirect back from the provider.
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

pub(crate) fn create_handshake_cookie(value: String, secure: bool) -> Cookie<'static> {
    session_cookie(
        COOKIE_HANDSHAKE,
        value,
        secure,
        CookieDuration::seconds(HANDSHAKE_TTL_SECS),
    )
}

pub(crate) fn create_access_cookie(value: String, secure: bool, ttl: Duration) -> Cookie<'static> {
    session_cookie(
        COOKIE_ACCESS,
        value,
        secure,
        CookieDuration::try_from(ttl).unwrap_or(CookieDuration::MAX),
    )
}

/// Removes the handshake cookie; the removal must use the same path it was set with.
pub(crate) fn remove_handshake_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(COOKIE_HANDSHAKE).path("/").build())
}
