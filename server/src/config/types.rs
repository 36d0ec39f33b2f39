//! Validated configuration of a running proxy.
//!
//! Unlike the flat [`crate::cli::ServeArgs`], these types only carry the data the
//! selected modes need, so consumers never deal with options that must be set.

use alloc::sync::Arc;
use core::{net::SocketAddr, time::Duration};
use std::path::PathBuf;

use secrecy::SecretString;

/// Default endpoint of the Cloud Storage JSON API.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// The provider for which the hosted-domain hint is sent.
pub const GOOGLE_PROVIDER: &str = "https://accounts.google.com";

/// Complete, immutable configuration for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Socket the HTTP listener binds to.
    pub listen: SocketAddr,
    pub bucket: String,
    /// Appended to request paths ending in `/`.
    pub main_page_suffix: Option<String>,
    /// Key served instead of a missing object.
    pub not_found_page: Option<String>,
    pub auth: AuthMode,
    /// Serve HTTPS when set.
    pub tls: Option<TlsConfig>,
    pub storage: StorageConfig,
    /// Upper bound for draining in-flight requests on shutdown.
    pub shutdown_grace: Duration,
}

/// Authentication strategy together with the data it requires.
#[derive(Debug, Clone)]
pub enum AuthMode {
    None,
    Basic(BasicAuthConfig),
    Oidc(Box<OidcConfig>),
}

impl AuthMode {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match *self {
            Self::None => "none",
            Self::Basic(_) => "basic",
            Self::Oidc(_) => "oidc",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub user: String,
    pub password: Arc<SecretString>,
}

/// OpenID Connect relying party settings.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Issuer URL used for discovery, exactly as the provider spells it.
    pub provider: String,
    /// Endpoint overrides; only honoured when both are set.
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: Arc<SecretString>,
    /// Extra scopes requested next to `openid`.
    pub scopes: Vec<String>,
    /// Required `hd` claim of the id token.
    pub google_hosted_domain: Option<String>,
    /// Externally visible URL of the proxy, without trailing slash.
    pub base_url: String,
    /// Key for the handshake and access session tokens.
    pub jwt_secret: Arc<SecretString>,
    /// Lifetime of the access session.
    pub jwt_expiration: Duration,
}

impl OidcConfig {
    /// The authorize and token endpoint overrides, when both are configured.
    #[must_use]
    pub fn endpoint_overrides(&self) -> Option<(&str, &str)> {
        self.authorize_url
            .as_deref()
            .zip(self.token_url.as_deref())
    }

    /// The `hd` hint for the authorization request, only sent to Google.
    #[must_use]
    pub fn hosted_domain(&self) -> Option<&str> {
        self.google_hosted_domain
            .as_deref()
            .filter(|_| self.provider.trim_end_matches('/') == GOOGLE_PROVIDER)
    }
}

/// PEM files for the HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// How the storage backend is reached and authenticated.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base URL of the JSON API, without trailing slash.
    pub endpoint: String,
    pub credentials: StorageCredentials,
}

#[derive(Debug, Clone)]
pub enum StorageCredentials {
    Anonymous,
    /// A fixed bearer token.
    Static(Arc<SecretString>),
    /// Tokens fetched from the instance metadata server.
    MetadataServer,
}
