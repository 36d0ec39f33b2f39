//! Cloud Storage backend speaking the JSON API over `reqwest`.

use alloc::sync::Arc;
use core::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{WrapErr as _, eyre};
use futures::{StreamExt as _, TryStreamExt as _};
use reqwest::{
    RequestBuilder, StatusCode,
    header::{ACCEPT_ENCODING, HeaderValue},
};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Deserializer};
use tokio::{sync::Mutex, time::Instant};
use url::Url;

use crate::{
    config::{StorageConfig, StorageCredentials},
    storage::{ObjectMetadata, ObjectStore, ObjectStream, StorageError},
};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    token: SecretString,
    refresh_at: Instant,
}

enum Credentials {
    Anonymous,
    Static(Arc<SecretString>),
    /// The lock is held across the refresh so concurrent requests share one fetch.
    MetadataServer(Mutex<Option<CachedToken>>),
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: SecretString,
    expires_in: u64,
}

/// Object resource as returned by `GET /storage/v1/b/{bucket}/o/{object}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    #[serde(deserialize_with = "size_from_json")]
    size: u64,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content_encoding: String,
    #[serde(default)]
    content_disposition: String,
    #[serde(default)]
    cache_control: String,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl From<GcsObject> for ObjectMetadata {
    fn from(object: GcsObject) -> Self {
        Self {
            size: object.size,
            content_type: object.content_type,
            content_encoding: object.content_encoding,
            content_disposition: object.content_disposition,
            cache_control: object.cache_control,
            last_modified: object.updated,
        }
    }
}

/// The JSON API encodes 64-bit integers as strings.
fn size_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Text(String),
        Number(u64),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[expect(
    clippy::module_name_repetitions,
    reason = "Re-exported from `storage`, where the prefix names the backend"
)]
pub struct GcsStore {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    credentials: Credentials,
}

impl GcsStore {
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid base URL or the HTTP client cannot be built.
    pub fn new(bucket: &str, config: &StorageConfig) -> eyre::Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .wrap_err(format!("Invalid storage endpoint: {}", config.endpoint))?;
        if endpoint.cannot_be_a_base() {
            eyre::bail!("Storage endpoint cannot be used as a base URL: {endpoint}");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("failed to build storage HTTP client")?;
        let credentials = match config.credentials {
            StorageCredentials::Anonymous => Credentials::Anonymous,
            StorageCredentials::Static(ref token) => Credentials::Static(token.clone()),
            StorageCredentials::MetadataServer => Credentials::MetadataServer(Mutex::new(None)),
        };
        tracing::info!(endpoint = %endpoint, bucket, "Using Cloud Storage backend");
        Ok(Self {
            http,
            endpoint,
            bucket: bucket.to_owned(),
            credentials,
        })
    }

    /// Resource URL of `key`; slashes inside the key are percent-encoded.
    fn object_url(&self, key: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", &self.bucket, "o", key]);
        }
        url
    }

    async fn fetch_metadata_token(&self) -> eyre::Result<CachedToken> {
        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .wrap_err("metadata server unreachable")?
            .error_for_status()
            .wrap_err("metadata server refused to issue a token")?;
        let MetadataToken {
            access_token,
            expires_in,
        } = response
            .json()
            .await
            .wrap_err("invalid token response from metadata server")?;
        let lifetime = Duration::from_secs(expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in, "Fetched storage access token from metadata server");
        Ok(CachedToken {
            token: access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }

    async fn authorize(&self, request: RequestBuilder) -> eyre::Result<RequestBuilder> {
        match self.credentials {
            Credentials::Anonymous => Ok(request),
            Credentials::Static(ref token) => Ok(request.bearer_auth(token.expose_secret())),
            Credentials::MetadataServer(ref cache) => {
                let mut guard = cache.lock().await;
                let cached = match guard.take() {
                    Some(cached) if cached.refresh_at > Instant::now() => cached,
                    _ => self.fetch_metadata_token().await?,
                };
                let request = request.bearer_auth(cached.token.expose_secret());
                *guard = Some(cached);
                Ok(request)
            }
        }
    }

    async fn send(
        &self,
        key: &str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, StorageError> {
        let request = self
            .authorize(request)
            .await
            .map_err(|e| StorageError::backend(key, e))?;
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::backend(key, e))?;
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(key.to_owned())),
            status => Err(StorageError::backend(
                key,
                eyre!("storage API answered with {status}"),
            )),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    #[tracing::instrument(skip(self))]
    async fn metadata(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let response = self.send(key, self.http.get(self.object_url(key))).await?;
        let object: GcsObject = response
            .json()
            .await
            .map_err(|e| StorageError::backend(key, e))?;
        Ok(object.into())
    }

    #[tracing::instrument(skip(self))]
    async fn content(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let mut url = self.object_url(key);
        url.query_pairs_mut().append_pair("alt", "media");
        // Ask for the stored bytes as-is; otherwise gzip objects get transcoded.
        let request = self
            .http
            .get(url)
            .header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let response = self.send(key, request).await?;
        let key = key.to_owned();
        Ok(response
            .bytes_stream()
            .map_err(move |e| StorageError::backend(&key, e))
            .boxed())
    }
}
