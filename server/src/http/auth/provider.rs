//! Lazily discovered OpenID Connect provider.
//!
//! Discovery runs on the first login or callback instead of at startup, so the
//! proxy keeps serving while the provider is unreachable. Concurrent first
//! requests share one discovery; a failed discovery is not cached and the next
//! request tries again.

use eyre::{WrapErr as _, eyre};
use oauth2_reqwest::ReqwestClient;
use openidconnect::{
    AuthUrl, ClientId, ClientSecret, EndpointMaybeSet, EndpointNotSet, EndpointSet, IssuerUrl,
    RedirectUrl, TokenUrl,
    core::{CoreClient, CoreProviderMetadata},
};
use reqwest::redirect::Policy;
use secrecy::ExposeSecret as _;
use tokio::sync::OnceCell;

use crate::{config::OidcConfig, http::auth::OIDC_PATH};

// Ready-to-use OIDC client type with the endpoints we require set
pub(crate) type OidcClientReady = CoreClient<
    EndpointSet,      // HasAuthUrl
    EndpointNotSet,   // HasDeviceAuthUrl
    EndpointNotSet,   // HasIntrospectionUrl (OIDC discovery does not provide this)
    EndpointNotSet,   // HasRevocationUrl (OIDC discovery does not provide this)
    EndpointSet,      // HasTokenUrl
    EndpointMaybeSet, // HasUserInfoUrl (from discovery, optional)
>;

/// Callback URL registered with the provider for `base_url`.
pub(crate) fn callback_url(base_url: &str) -> String {
    format!("{base_url}{OIDC_PATH}/callback")
}

pub(crate) struct OidcRuntime {
    pub config: OidcConfig,
    /// Shared by discovery and the token exchange. Redirects are not followed,
    /// as the token endpoint must answer directly.
    pub http: ReqwestClient,
    client: OnceCell<OidcClientReady>,
}

impl core::fmt::Debug for OidcRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OidcRuntime")
            .field("provider", &self.config.provider)
            .field("discovered", &self.client.initialized())
            .finish_non_exhaustive()
    }
}

impl OidcRuntime {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub(crate) fn new(config: OidcConfig) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .wrap_err("failed to build OIDC HTTP client")?;
        Ok(Self {
            config,
            http: ReqwestClient::from(http),
            client: OnceCell::new(),
        })
    }

    /// The configured client, running discovery first if it has not succeeded yet.
    pub(crate) async fn client(&self) -> eyre::Result<&OidcClientReady> {
        self.client.get_or_try_init(|| self.discover()).await
    }

    #[tracing::instrument(skip(self), fields(issuer = %self.config.provider))]
    async fn discover(&self) -> eyre::Result<OidcClientReady> {
        let config = &self.config;
        let issuer = IssuerUrl::new(config.provider.clone()).wrap_err("invalid issuer URL")?;
        let metadata = CoreProviderMetadata::discover_async(issuer, &self.http)
            .await
            .wrap_err("OIDC discovery failed")?;

        let (auth_url, token_url) = if let Some((authorize, token)) = config.endpoint_overrides() {
            (
                AuthUrl::new(authorize.to_owned()).wrap_err("invalid OIDC authorize URL")?,
                TokenUrl::new(token.to_owned()).wrap_err("invalid OIDC token URL")?,
            )
        } else {
            let token_url = metadata
                .token_endpoint()
                .cloned()
                .ok_or_else(|| eyre!("OIDC provider missing token endpoint"))?;
            (metadata.authorization_endpoint().clone(), token_url)
        };
        let redirect_url = RedirectUrl::new(callback_url(&config.base_url))
            .wrap_err("invalid OIDC redirect URL")?;

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(
                config.client_secret.expose_secret().to_owned(),
            )),
        )
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

        tracing::info!("OIDC provider discovered");
        Ok(client)
    }
}
