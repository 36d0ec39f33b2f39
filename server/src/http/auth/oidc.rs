//! OIDC authorization-code flow: login redirect and provider callback.

use alloc::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use eyre::{WrapErr as _, eyre};
use gcsproxy_common::{AccessClaims, TokenError};
use openidconnect::{
    AuthorizationCode, CsrfToken, Nonce, PkceCodeChallenge, PkceCodeVerifier, Scope,
    core::{CoreAuthenticationFlow, CoreIdToken},
};
use secrecy::ExposeSecret as _;
use serde::Deserialize;

use crate::http::auth::{
    cookies::{
        COOKIE_HANDSHAKE, HANDSHAKE_TTL_SECS, HandshakeSession, create_access_cookie,
        create_handshake_cookie, remove_handshake_cookie,
    },
    found,
    provider::OidcRuntime,
    request_is_secure,
    unix_now,
};

/// State of the routes under `/_gcsproxy/oidc`.
#[derive(Clone)]
pub(crate) struct OidcState {
    pub oidc: Arc<OidcRuntime>,
    pub tls_enabled: bool,
}

/// Failures of the handshake. Each maps to a fixed status; none of them sets a session cookie.
#[derive(Debug, thiserror::Error)]
pub(crate) enum OidcError {
    #[error("redirect must be a path starting with `/`")]
    InvalidRedirectUrl,
    #[error("handshake state is missing, expired or does not match")]
    InvalidState,
    #[error("callback carries no authorization code")]
    MissingCode,
    #[error("provider rejected the authorization request: {0}")]
    Provider(String),
    #[error("identity does not belong to the allowed hosted domain")]
    InvalidHostedDomain,
    #[error("id token is missing or invalid")]
    InvalidIdToken(#[source] eyre::Report),
    #[error("OIDC provider discovery failed")]
    Discovery(#[source] eyre::Report),
    #[error("authorization code exchange failed")]
    Exchange(#[source] eyre::Report),
    #[error("failed to sign session")]
    Session(#[source] TokenError),
}

impl OidcError {
    const fn status(&self) -> StatusCode {
        match *self {
            Self::InvalidRedirectUrl
            | Self::InvalidState
            | Self::MissingCode
            | Self::Provider(_) => StatusCode::BAD_REQUEST,
            Self::InvalidHostedDomain => StatusCode::FORBIDDEN,
            Self::InvalidIdToken(_)
            | Self::Discovery(_)
            | Self::Exchange(_)
            | Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "OIDC handshake failed");
        } else {
            tracing::warn!(error = %self, "OIDC handshake rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    redirect: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Accepts only local paths; a missing value means the root.
fn validate_redirect(redirect: Option<String>) -> Result<String, OidcError> {
    let redirect = redirect.unwrap_or_else(|| "/".to_owned());
    if !redirect.starts_with('/') || redirect.chars().any(char::is_control) {
        return Err(OidcError::InvalidRedirectUrl);
    }
    Ok(redirect)
}

/// Opens the handshake cookie and checks it against the `state` echoed by the provider.
fn check_state(
    cookie: Option<&str>,
    state: Option<&str>,
    secret: &[u8],
    now: i64,
) -> Result<HandshakeSession, OidcError> {
    let cookie = cookie.ok_or_else(|| {
        tracing::warn!("OIDC callback without handshake cookie");
        OidcError::InvalidState
    })?;
    let session = HandshakeSession::open(cookie, secret, now).map_err(|e| {
        tracing::warn!(error = %e, "OIDC callback with unusable handshake cookie");
        OidcError::InvalidState
    })?;
    match state {
        Some(state)
            if gcsproxy_common::constant_time_eq(state.as_bytes(), session.state.as_bytes()) =>
        {
            Ok(session)
        }
        _ => {
            tracing::warn!("OIDC callback state mismatch");
            Err(OidcError::InvalidState)
        }
    }
}

/// Reads the `hd` claim from a compact id token whose signature was already verified.
fn hosted_domain_claim(raw_id_token: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct HostedDomain {
        hd: Option<String>,
    }

    let payload = raw_id_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice::<HostedDomain>(&decoded).ok()?.hd
}

fn check_hosted_domain(id_token: &CoreIdToken, expected: &str) -> Result<(), OidcError> {
    let raw = serde_json::to_value(id_token)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    match hosted_domain_claim(&raw) {
        Some(ref hd) if hd == expected => Ok(()),
        other => {
            tracing::warn!(hd = ?other, expected, "id token from another hosted domain");
            Err(OidcError::InvalidHostedDomain)
        }
    }
}

/// Starts the handshake and redirects the browser to the provider.
#[tracing::instrument(skip_all)]
pub(crate) async fn login(
    State(OidcState { oidc, tls_enabled }): State<OidcState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(LoginQuery { redirect }): Query<LoginQuery>,
) -> Result<Response, OidcError> {
    let redirect_url = validate_redirect(redirect)?;
    let client = oidc.client().await.map_err(OidcError::Discovery)?;
    let config = &oidc.config;

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let mut authorize = client.authorize_url(
        CoreAuthenticationFlow::AuthorizationCode,
        || CsrfToken::new_random_len(32),
        Nonce::new_random,
    );
    // `openid` is always requested.
    for scope in config.scopes.iter().filter(|s| *s != "openid") {
        authorize = authorize.add_scope(Scope::new(scope.clone()));
    }
    if let Some(hd) = config.hosted_domain() {
        authorize = authorize.add_extra_param("hd", hd.to_owned());
    }
    let (auth_url, csrf_token, nonce) = authorize.set_pkce_challenge(pkce_challenge).url();

    let session = HandshakeSession {
        state: csrf_token.secret().clone(),
        redirect_url,
        nonce: nonce.secret().clone(),
        pkce_verifier: pkce_verifier.secret().clone(),
        exp: unix_now().saturating_add(HANDSHAKE_TTL_SECS),
    };
    let sealed = session
        .seal(config.jwt_secret.expose_secret().as_bytes())
        .map_err(OidcError::Session)?;
    let jar = jar.add(create_handshake_cookie(
        sealed,
        request_is_secure(&headers, tls_enabled),
    ));

    tracing::info!(redirect = %session.redirect_url, "Redirecting to OIDC provider");
    Ok((jar, found(auth_url.as_str())).into_response())
}

/// Completes the handshake: exchanges the code, verifies the id token and issues the access session.
#[tracing::instrument(skip_all)]
pub(crate) async fn callback(
    State(OidcState { oidc, tls_enabled }): State<OidcState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(CallbackQuery {
        code,
        state,
        error,
        error_description,
    }): Query<CallbackQuery>,
) -> Result<Response, OidcError> {
    let config = &oidc.config;
    let secret = config.jwt_secret.expose_secret().as_bytes();
    let now = unix_now();

    let session = check_state(
        jar.get(COOKIE_HANDSHAKE).map(|c| c.value()),
        state.as_deref(),
        secret,
        now,
    )?;

    if let Some(error) = error {
        tracing::warn!(
            %error,
            description = error_description.as_deref().unwrap_or("No Description"),
            "OIDC error from provider"
        );
        return Err(OidcError::Provider(error));
    }
    let code = code
        .filter(|c| !c.is_empty())
        .ok_or(OidcError::MissingCode)?;

    let client = oidc.client().await.map_err(OidcError::Discovery)?;
    let token_response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(PkceCodeVerifier::new(session.pkce_verifier.clone()))
        .request_async(&oidc.http)
        .await
        .wrap_err("token endpoint rejected the authorization code")
        .map_err(OidcError::Exchange)?;

    let id_token = token_response
        .extra_fields()
        .id_token()
        .ok_or_else(|| OidcError::InvalidIdToken(eyre!("token response carries no id_token")))?;
    let claims = id_token
        .claims(&client.id_token_verifier(), &Nonce::new(session.nonce.clone()))
        .map_err(|e| OidcError::InvalidIdToken(e.into()))?;
    // Enforced whenever configured, even though only Google receives the hint.
    if let Some(expected) = config.google_hosted_domain.as_deref() {
        check_hosted_domain(id_token, expected)?;
    }
    let subject = claims.subject().to_string();

    let ttl_secs = i64::try_from(config.jwt_expiration.as_secs()).unwrap_or(i64::MAX);
    let access = AccessClaims::issue(subject, &config.base_url, now, ttl_secs)
        .sign(secret)
        .map_err(OidcError::Session)?;
    let jar = remove_handshake_cookie(jar).add(create_access_cookie(
        access,
        request_is_secure(&headers, tls_enabled),
        config.jwt_expiration,
    ));

    tracing::info!(redirect = %session.redirect_url, "OIDC login completed");
    Ok((
        jar,
        found(&format!("{}{}", config.base_url, session.redirect_url)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"jwt-secret";
    const NOW: i64 = 1_700_000_000;

    fn sealed(state: &str, exp: i64) -> String {
        HandshakeSession {
            state: state.to_owned(),
            redirect_url: "/docs/".to_owned(),
            nonce: "nonce".to_owned(),
            pkce_verifier: "verifier".to_owned(),
            exp,
        }
        .seal(SECRET)
        .unwrap()
    }

    #[test]
    fn redirect_must_be_a_local_path() {
        assert_eq!(validate_redirect(None).unwrap(), "/");
        assert_eq!(
            validate_redirect(Some("/a/b?c=d".to_owned())).unwrap(),
            "/a/b?c=d"
        );
        for bad in ["", "https://evil.example.com/", "docs/", "/\r\nSet-Cookie: x=y"] {
            assert!(
                matches!(
                    validate_redirect(Some(bad.to_owned())),
                    Err(OidcError::InvalidRedirectUrl)
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn state_must_match_the_handshake_cookie() {
        let cookie = sealed("expected-state", NOW + 300);

        let session = check_state(Some(&cookie), Some("expected-state"), SECRET, NOW).unwrap();
        assert_eq!(session.redirect_url, "/docs/");

        for (cookie, state) in [
            (None, Some("expected-state")),
            (Some(cookie.as_str()), None),
            (Some(cookie.as_str()), Some("forged-state")),
            (Some("garbage"), Some("expected-state")),
        ] {
            assert!(matches!(
                check_state(cookie, state, SECRET, NOW),
                Err(OidcError::InvalidState)
            ));
        }
    }

    #[test]
    fn expired_handshake_is_rejected() {
        let cookie = sealed("expected-state", NOW);
        assert!(matches!(
            check_state(Some(&cookie), Some("expected-state"), SECRET, NOW),
            Err(OidcError::InvalidState)
        ));
    }

    #[test]
    fn hosted_domain_is_read_from_the_payload() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"1","hd":"example.com"}"#);
        assert_eq!(
            hosted_domain_claim(&format!("e30.{payload}.sig")).as_deref(),
            Some("example.com")
        );
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"1"}"#);
        assert_eq!(hosted_domain_claim(&format!("e30.{payload}.sig")), None);
        assert_eq!(hosted_domain_claim("not-a-token"), None);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(OidcError::InvalidRedirectUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OidcError::InvalidState.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            OidcError::Provider("access_denied".to_owned()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(OidcError::InvalidHostedDomain.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            OidcError::InvalidIdToken(eyre!("missing")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            OidcError::Exchange(eyre!("refused")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
