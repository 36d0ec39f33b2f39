//! Object delivery: maps request paths to storage keys and streams objects back.
//!
//! Small objects are read completely and answered with an exact `Content-Length`.
//! Objects of [`STREAMING_THRESHOLD`] bytes or more are relayed as a chunked body
//! in [`STREAM_CHUNK_SIZE`] segments, so memory use stays bounded.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{
        HeaderName, HeaderValue, StatusCode, Uri,
        header::{
            CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE,
            LAST_MODIFIED,
        },
    },
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt as _, TryStreamExt as _, stream};

use crate::{
    app::AppState,
    http::auth::is_reserved_path,
    storage::{ObjectMetadata, ObjectStore, ObjectStream, StorageError},
};

/// Objects of at least this size are streamed instead of buffered.
pub const STREAMING_THRESHOLD: u64 = 32 * 1024 * 1024;
/// Segment size of streamed bodies.
pub const STREAM_CHUNK_SIZE: usize = 32 * 1024;
/// Cache policy whenever authentication is enabled, so shared caches never keep gated content.
pub const PRIVATE_CACHE_CONTROL: &str = "private, max-age=60";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryMode {
    Buffered,
    Chunked,
}

impl DeliveryMode {
    pub(crate) const fn for_size(size: u64) -> Self {
        if size < STREAMING_THRESHOLD {
            Self::Buffered
        } else {
            Self::Chunked
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("object not found")]
    ObjectNotFound,
    /// Kept for completeness: hyper always supports incremental bodies.
    #[error("streaming is not supported by this connection")]
    StreamingUnsupported,
    #[error("failed to fetch object")]
    Internal(#[source] StorageError),
}

impl From<StorageError> for DeliveryError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound(_) => Self::ObjectNotFound,
            other @ StorageError::Backend { .. } => Self::Internal(other),
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        match self {
            Self::ObjectNotFound => StatusCode::NOT_FOUND.into_response(),
            Self::StreamingUnsupported => {
                tracing::error!("streaming unsupported");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::Internal(error) => {
                tracing::error!(error = ?error, "storage backend failure");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Storage key for a request path (without its leading `/`).
///
/// Paths naming a directory get the main page suffix appended.
pub(crate) fn object_key(path: &str, main_page_suffix: Option<&str>) -> String {
    let key = path.strip_prefix('/').unwrap_or(path);
    match main_page_suffix {
        Some(suffix) if key.is_empty() || key.ends_with('/') => format!("{key}{suffix}"),
        _ => key.to_owned(),
    }
}

/// Looks up `key`, retrying once with the not-found page when the object is missing.
///
/// Returns the key that was found together with its metadata.
pub(crate) async fn lookup_with_fallback(
    store: &dyn ObjectStore,
    key: String,
    not_found_page: Option<&str>,
) -> Result<(String, ObjectMetadata), DeliveryError> {
    let mut key = key;
    let mut allow_fallback = true;
    loop {
        // An empty name would address the bucket listing instead of an object.
        let result = if key.is_empty() {
            Err(StorageError::NotFound(key.clone()))
        } else {
            store.metadata(&key).await
        };
        match result {
            Ok(metadata) => return Ok((key, metadata)),
            Err(StorageError::NotFound(_)) if allow_fallback => match not_found_page {
                Some(fallback) if fallback != key => {
                    tracing::debug!(missing = %key, fallback, "serving not-found page");
                    key = fallback.to_owned();
                    allow_fallback = false;
                }
                _ => return Err(DeliveryError::ObjectNotFound),
            },
            Err(error) => return Err(error.into()),
        }
    }
}

fn set_header(response: &mut Response, name: HeaderName, value: &str) {
    if value.is_empty() {
        return;
    }
    match HeaderValue::from_str(value) {
        Ok(value) => {
            response.headers_mut().insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "skipping object header with invalid value"),
    }
}

/// Copies object metadata into response headers. `Cache-Control` depends on whether auth is enabled.
pub(crate) fn apply_object_headers(
    response: &mut Response,
    metadata: &ObjectMetadata,
    auth_enabled: bool,
) {
    if let Some(modified) = metadata.last_modified {
        let http_date = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        set_header(response, LAST_MODIFIED, &http_date);
    }
    set_header(response, CONTENT_TYPE, &metadata.content_type);
    set_header(response, CONTENT_ENCODING, &metadata.content_encoding);
    set_header(response, CONTENT_DISPOSITION, &metadata.content_disposition);
    let cache_control = if auth_enabled {
        PRIVATE_CACHE_CONTROL
    } else {
        metadata.cache_control.as_str()
    };
    set_header(response, CACHE_CONTROL, cache_control);
}

struct Rechunk {
    inner: ObjectStream,
    buffer: BytesMut,
    finished: bool,
    key: String,
}

/// Regroups a backend stream into segments of exactly `chunk_size` bytes (the last may be shorter).
///
/// A backend error is logged, yielded once, and ends the stream, which aborts the response.
pub(crate) fn rechunk(
    inner: ObjectStream,
    key: String,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, StorageError>> + Send + 'static {
    let state = Rechunk {
        inner,
        buffer: BytesMut::with_capacity(chunk_size),
        finished: false,
        key,
    };
    stream::unfold(state, move |mut state| async move {
        loop {
            if state.buffer.len() >= chunk_size {
                let chunk = state.buffer.split_to(chunk_size).freeze();
                return Some((Ok(chunk), state));
            }
            if state.finished {
                if state.buffer.is_empty() {
                    return None;
                }
                let chunk = state.buffer.split().freeze();
                return Some((Ok(chunk), state));
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(error)) => {
                    tracing::warn!(
                        key = %state.key,
                        error = ?error,
                        "object stream failed mid-response"
                    );
                    state.buffer.clear();
                    state.finished = true;
                    return Some((Err(error), state));
                }
                None => state.finished = true,
            }
        }
    })
}

async fn deliver(state: &AppState, path: &str) -> Result<Response, DeliveryError> {
    let config = &state.config;
    let key = object_key(path, config.main_page_suffix.as_deref());
    let (key, metadata) =
        lookup_with_fallback(state.store.as_ref(), key, config.not_found_page.as_deref()).await?;

    let content = state.store.content(&key).await?;
    let mode = DeliveryMode::for_size(metadata.size);
    tracing::debug!(%key, size = metadata.size, ?mode, "delivering object");

    let mut response = match mode {
        DeliveryMode::Buffered => {
            let body = content
                .try_fold(
                    BytesMut::with_capacity(usize::try_from(metadata.size).unwrap_or(0)),
                    |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    },
                )
                .await?
                .freeze();
            let length = HeaderValue::from(body.len());
            let mut response = Body::from(body).into_response();
            response.headers_mut().insert(CONTENT_LENGTH, length);
            response
        }
        DeliveryMode::Chunked => {
            Body::from_stream(rechunk(content, key, STREAM_CHUNK_SIZE)).into_response()
        }
    };
    apply_object_headers(&mut response, &metadata, state.auth.is_enabled());
    Ok(response)
}

/// Serves `/`.
#[tracing::instrument(skip_all)]
pub(crate) async fn serve_root(State(state): State<AppState>) -> Result<Response, DeliveryError> {
    deliver(&state, "/").await
}

/// Serves any other path.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
pub(crate) async fn serve_path(
    State(state): State<AppState>,
    uri: Uri,
    Path(path): Path<String>,
) -> Result<Response, DeliveryError> {
    if is_reserved_path(uri.path()) {
        return Err(DeliveryError::ObjectNotFound);
    }
    deliver(&state, &path).await
}
