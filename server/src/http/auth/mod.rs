//! Authentication for the proxy: optional Basic or OIDC based login.
//!
//! - Basic mode: every request must carry the configured credentials.
//! - OIDC mode: standard authorization code flow with PKCE. The result is a
//!   stateless signed access session cookie; no server-side session store exists.
//!
//! Paths under [`PROXY_PATH_PREFIX`] are never gated, as they host the login flow itself.

pub(crate) mod basic;
pub(crate) mod cookies;
pub(crate) mod middleware;
pub(crate) mod oidc;
pub(crate) mod provider;

use alloc::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse as _, Response},
    routing::get,
};
use chrono::Utc;
use secrecy::SecretString;

use crate::{app::AppState, config::AuthMode};

pub(crate) use middleware::{request_is_secure, require};
use oidc::OidcState;
use provider::OidcRuntime;

/// Reserved path prefix for the proxy's own endpoints.
pub const PROXY_PATH_PREFIX: &str = "/_gcsproxy";
/// Mount point of the OIDC routes.
pub const OIDC_PATH: &str = "/_gcsproxy/oidc";

/// Whether `path` is the reserved prefix or below it.
pub(crate) fn is_reserved_path(path: &str) -> bool {
    path.strip_prefix(PROXY_PATH_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// A `302 Found` redirect.
///
/// `axum::response::Redirect` only offers 303, 307 and 308.
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(error) => {
            tracing::error!(%error, location, "redirect target is not a valid header value");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) struct Runtime {
    pub mode: Resolved,
}

/// The authentication strategy, resolved once at startup.
#[derive(Debug)]
pub(crate) enum Resolved {
    Disabled,
    Basic {
        user: String,
        password: Arc<SecretString>,
    },
    Oidc(Arc<OidcRuntime>),
}

impl Runtime {
    /// Creates the runtime for the configured mode. The OIDC provider is only
    /// contacted on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the OIDC HTTP client cannot be built.
    pub(crate) fn from_config(mode: &AuthMode) -> eyre::Result<Self> {
        let mode = match *mode {
            AuthMode::None => Resolved::Disabled,
            AuthMode::Basic(ref basic) => Resolved::Basic {
                user: basic.user.clone(),
                password: basic.password.clone(),
            },
            AuthMode::Oidc(ref oidc) => {
                Resolved::Oidc(Arc::new(OidcRuntime::new(oidc.as_ref().clone())?))
            }
        };
        tracing::info!(mode = ?mode, "Auth mode resolved");
        Ok(Self { mode })
    }

    /// Whether any authentication is enforced.
    pub(crate) const fn is_enabled(&self) -> bool {
        !matches!(self.mode, Resolved::Disabled)
    }
}

/// Routes of the OIDC flow, to be nested at [`OIDC_PATH`]. `None` unless OIDC is configured.
pub(crate) fn oidc_routes(auth: &Runtime, tls_enabled: bool) -> Option<Router<AppState>> {
    let Resolved::Oidc(ref oidc) = auth.mode else {
        return None;
    };
    Some(
        Router::new()
            .route("/login", get(oidc::login))
            .route("/callback", get(oidc::callback))
            .with_state(OidcState {
                oidc: oidc.clone(),
                tls_enabled,
            }),
    )
}

#[derive(Clone)]
pub(crate) struct LayerState {
    pub auth: Arc<Runtime>,
}

impl FromRef<AppState> for LayerState {
    fn from_ref(input: &AppState) -> Self {
        Self {
            auth: input.auth.clone(),
        }
    }
}
