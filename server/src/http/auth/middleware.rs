//! Authentication gate and security utilities.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, header::WWW_AUTHENTICATE},
    middleware::Next,
    response::{IntoResponse as _, Response},
};
use axum_extra::extract::cookie::CookieJar;
use gcsproxy_common::verify_access_token;
use secrecy::ExposeSecret as _;
use url::Url;

use crate::http::auth::{
    LayerState, OIDC_PATH, Resolved,
    basic::{BASIC_CHALLENGE, credentials_match},
    cookies::COOKIE_ACCESS,
    found, is_reserved_path,
    provider::OidcRuntime,
    unix_now,
};

/// Outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GateDecision {
    Allow,
    /// Ask the client for Basic credentials.
    Challenge,
    /// Send the browser to the login route at this location.
    Redirect(String),
}

/// Where an unauthenticated request for `path` is sent.
pub(crate) fn login_location(base_url: &str, path: &str) -> Option<String> {
    Url::parse_with_params(&format!("{base_url}{OIDC_PATH}/login"), [("redirect", path)])
        .ok()
        .map(String::from)
}

fn decide_oidc(oidc: &OidcRuntime, headers: &HeaderMap, path: &str, now: i64) -> GateDecision {
    let config = &oidc.config;
    let jar = CookieJar::from_headers(headers);
    let verdict = jar.get(COOKIE_ACCESS).map(|cookie| {
        verify_access_token(
            cookie.value(),
            config.jwt_secret.expose_secret().as_bytes(),
            &config.base_url,
            now,
        )
    });
    match verdict {
        Some(Ok(claims)) => {
            tracing::debug!(sub = %claims.sub, "require: valid access session");
            GateDecision::Allow
        }
        Some(Err(error)) => {
            tracing::info!(%error, "require: rejected access session, redirecting to login");
            redirect_to_login(&config.base_url, path)
        }
        None => {
            tracing::debug!("require: no access session, redirecting to login");
            redirect_to_login(&config.base_url, path)
        }
    }
}

fn redirect_to_login(base_url: &str, path: &str) -> GateDecision {
    // base_url was validated at startup, so this only falls back for unparsable bases.
    GateDecision::Redirect(
        login_location(base_url, path).unwrap_or_else(|| format!("{base_url}{OIDC_PATH}/login")),
    )
}

/// Decides whether a request for `path` may proceed under `mode`.
pub(crate) fn decide(mode: &Resolved, headers: &HeaderMap, path: &str, now: i64) -> GateDecision {
    if is_reserved_path(path) {
        return GateDecision::Allow;
    }
    match *mode {
        Resolved::Disabled => GateDecision::Allow,
        Resolved::Basic {
            ref user,
            ref password,
        } => {
            if credentials_match(headers, user, password) {
                GateDecision::Allow
            } else {
                tracing::debug!("require: missing or wrong basic credentials");
                GateDecision::Challenge
            }
        }
        Resolved::Oidc(ref oidc) => decide_oidc(oidc, headers, path, now),
    }
}

/// Middleware that enforces authentication depending on configured mode.
pub(crate) async fn require(
    State(LayerState { auth }): State<LayerState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match decide(&auth.mode, req.headers(), req.uri().path(), unix_now()) {
        GateDecision::Allow => next.run(req).await,
        GateDecision::Challenge => (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, HeaderValue::from_static(BASIC_CHALLENGE))],
        )
            .into_response(),
        GateDecision::Redirect(location) => found(&location),
    }
}

/// Determine whether the incoming request should be considered secure.
/// First considers whether the server was started with TLS enabled. If so,
/// all requests are treated as secure. Otherwise falls back to the common
/// proxy headers: X-Forwarded-Proto, Forwarded and X-Forwarded-SSL.
pub(crate) fn request_is_secure(headers: &HeaderMap, tls_enabled: bool) -> bool {
    if tls_enabled {
        return true;
    }
    if let Some(p) = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        && p.eq_ignore_ascii_case("https")
    {
        return true;
    }
    if let Some(fwd) = headers.get("forwarded").and_then(|v| v.to_str().ok())
        && fwd.to_lowercase().contains("proto=https")
    {
        return true;
    }
    if let Some(x) = headers.get("x-forwarded-ssl").and_then(|v| v.to_str().ok())
        && x.eq_ignore_ascii_case("on")
    {
        return true;
    }
    false
}
