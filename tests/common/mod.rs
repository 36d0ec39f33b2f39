//! Shared helpers: an in-process OpenID provider and proxy builders.

use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::{collections::HashMap, sync::Mutex};

use axum::{
    Form, Json, Router,
    body::Body,
    extract::State,
    http::{Request, Response, header::SET_COOKIE},
    routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use gcsproxy_server::{
    AppState, create_app,
    config::{
        AuthMode, DEFAULT_STORAGE_ENDPOINT, OidcConfig, ProxyConfig, StorageConfig,
        StorageCredentials,
    },
    storage::MemoryStore,
};
use openidconnect::{
    AdditionalClaims, Audience, IdToken, IdTokenClaims, IssuerUrl, JsonWebKeyId, Nonce,
    PrivateSigningKey as _, StandardClaims, SubjectIdentifier,
    core::{
        CoreGenderClaim, CoreJsonWebKeySet, CoreJweContentEncryptionAlgorithm,
        CoreJwsSigningAlgorithm, CoreRsaPrivateSigningKey,
    },
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower::ServiceExt as _;
use url::Url;

pub const BASE_URL: &str = "https://files.example.com";
pub const JWT_SECRET: &str = "integration-jwt-secret";
pub const CLIENT_ID: &str = "gcsproxy-client";
pub const HOSTED_DOMAIN: &str = "example.com";
pub const SUBJECT: &str = "user-1";

const SIGNING_KEY_PEM: &str = include_str!("../fixtures/mock_provider_rsa.pem");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HostedDomainClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    hd: Option<String>,
}

impl AdditionalClaims for HostedDomainClaims {}

type MockIdToken = IdToken<
    HostedDomainClaims,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
>;

/// How the token endpoint builds the id token of its next responses.
#[derive(Debug, Clone)]
pub struct IdTokenPlan {
    /// Answer without any id token.
    pub omit: bool,
    pub hosted_domain: Option<String>,
    /// Overrides the client id as audience.
    pub audience: Option<String>,
    /// Overrides the nonce of the authorization request.
    pub nonce: Option<String>,
}

impl Default for IdTokenPlan {
    fn default() -> Self {
        Self {
            omit: false,
            hosted_domain: Some(HOSTED_DOMAIN.to_owned()),
            audience: None,
            nonce: None,
        }
    }
}

#[derive(Clone)]
struct ProviderState {
    issuer: String,
    key: Arc<CoreRsaPrivateSigningKey>,
    plan: Arc<Mutex<IdTokenPlan>>,
    /// Nonce of the authorization request, by issued code.
    nonces: Arc<Mutex<HashMap<String, String>>>,
    discovery_hits: Arc<AtomicUsize>,
    token_hits: Arc<AtomicUsize>,
}

/// A minimal OpenID provider: discovery, an RSA key set and a token endpoint
/// issuing RS256 id tokens.
pub struct MockProvider {
    state: ProviderState,
}

impl MockProvider {
    pub async fn start() -> Self {
        Self::launch("").await
    }

    /// A provider whose issuer identifier ends with `/`.
    pub async fn start_with_trailing_slash() -> Self {
        Self::launch("/").await
    }

    async fn launch(issuer_suffix: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = format!("http://{addr}");
        let key = CoreRsaPrivateSigningKey::from_pem(
            SIGNING_KEY_PEM,
            Some(JsonWebKeyId::new("mock-key".to_owned())),
        )
        .unwrap();

        let state = ProviderState {
            issuer: format!("{base}{issuer_suffix}"),
            key: Arc::new(key),
            plan: Arc::default(),
            nonces: Arc::default(),
            discovery_hits: Arc::default(),
            token_hits: Arc::default(),
        };

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .route("/token", post(token_endpoint))
            .with_state(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { state }
    }

    pub fn issuer(&self) -> String {
        self.state.issuer.clone()
    }

    /// Stands in for the user consenting at the authorization endpoint: records
    /// the request's nonce and returns the code the browser would bring back.
    pub fn authorize(&self, authorize_url: &Url) -> String {
        let nonce = authorize_url
            .query_pairs()
            .find(|(name, _)| name == "nonce")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        let mut nonces = self.state.nonces.lock().unwrap();
        let code = format!("code-{}", nonces.len());
        nonces.insert(code.clone(), nonce);
        code
    }

    pub fn plan(&self, plan: IdTokenPlan) {
        *self.state.plan.lock().unwrap() = plan;
    }

    pub fn discovery_hits(&self) -> usize {
        self.state.discovery_hits.load(Ordering::SeqCst)
    }

    pub fn token_hits(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }
}

async fn discovery(State(state): State<ProviderState>) -> Json<Value> {
    state.discovery_hits.fetch_add(1, Ordering::SeqCst);
    let base = state.issuer.trim_end_matches('/');
    Json(json!({
        "issuer": state.issuer,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/jwks"),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
    }))
}

async fn jwks(State(state): State<ProviderState>) -> Json<CoreJsonWebKeySet> {
    Json(CoreJsonWebKeySet::new(vec![state.key.as_verification_key()]))
}

fn sign_id_token(state: &ProviderState, nonce: String, plan: IdTokenPlan) -> Value {
    let now = Utc::now();
    let claims = IdTokenClaims::new(
        IssuerUrl::new(state.issuer.clone()).unwrap(),
        vec![Audience::new(
            plan.audience.unwrap_or_else(|| CLIENT_ID.to_owned()),
        )],
        now + TimeDelta::minutes(5),
        now,
        StandardClaims::new(SubjectIdentifier::new(SUBJECT.to_owned())),
        HostedDomainClaims {
            hd: plan.hosted_domain,
        },
    )
    .set_nonce(Some(Nonce::new(plan.nonce.unwrap_or(nonce))));
    let token = MockIdToken::new(
        claims,
        state.key.as_ref(),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
        None,
        None,
    )
    .unwrap();
    serde_json::to_value(&token).unwrap()
}

async fn token_endpoint(
    State(state): State<ProviderState>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    state.token_hits.fetch_add(1, Ordering::SeqCst);
    let plan = state.plan.lock().unwrap().clone();
    let mut response = json!({
        "access_token": "provider-access-token",
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if !plan.omit {
        let nonce = form
            .get("code")
            .and_then(|code| state.nonces.lock().unwrap().get(code).cloned())
            .unwrap_or_default();
        response["id_token"] = sign_id_token(&state, nonce, plan);
    }
    Json(response)
}

pub fn oidc_config(issuer: &str) -> OidcConfig {
    OidcConfig {
        provider: issuer.to_owned(),
        authorize_url: None,
        token_url: None,
        client_id: CLIENT_ID.to_owned(),
        client_secret: Arc::new(SecretString::from("client-secret")),
        scopes: vec!["openid".to_owned(), "email".to_owned()],
        google_hosted_domain: Some(HOSTED_DOMAIN.to_owned()),
        base_url: BASE_URL.to_owned(),
        jwt_secret: Arc::new(SecretString::from(JWT_SECRET)),
        jwt_expiration: Duration::from_secs(3600),
    }
}

fn proxy_config(auth: AuthMode) -> ProxyConfig {
    ProxyConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        bucket: "assets".to_owned(),
        main_page_suffix: Some("index.html".to_owned()),
        not_found_page: None,
        auth,
        tls: None,
        storage: StorageConfig {
            endpoint: DEFAULT_STORAGE_ENDPOINT.to_owned(),
            credentials: StorageCredentials::Anonymous,
        },
        shutdown_grace: Duration::from_secs(1),
    }
}

pub fn proxy(auth: AuthMode, store: MemoryStore) -> Router {
    gcsproxy_server::install_crypto_provider();
    create_app(AppState::new(proxy_config(auth), Arc::new(store)).unwrap())
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

/// The full `Set-Cookie` header for `name`, attributes included.
pub fn set_cookie_header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_owned)
}

/// The `name=value` part of a `Set-Cookie` header.
pub fn cookie_pair(header: &str) -> String {
    header.split(';').next().unwrap().to_owned()
}
