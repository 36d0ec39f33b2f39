use alloc::sync::Arc;

use crate::{
    config::ProxyConfig,
    http::auth,
    storage::{self, ObjectStore},
};

/// Application state shared across request handlers.
#[derive(Clone)]
#[expect(
    clippy::module_name_repetitions,
    reason = "Re-exported at the crate root as the router state"
)]
pub struct AppState {
    /// Validated configuration, fixed for the lifetime of the process.
    pub(crate) config: Arc<ProxyConfig>,

    /// Authentication runtime (mode and secrets)
    pub(crate) auth: Arc<auth::Runtime>,

    /// Backend objects are read from.
    pub(crate) store: Arc<dyn ObjectStore>,

    /// Whether the HTTP server was started with TLS enabled (true for HTTPS)
    pub(crate) tls_enabled: bool,
}

impl AppState {
    /// Assembles the state for `config`, reading objects from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authentication runtime cannot be created.
    pub fn new(config: ProxyConfig, store: Arc<dyn ObjectStore>) -> eyre::Result<Self> {
        let auth = Arc::new(auth::Runtime::from_config(&config.auth)?);
        Ok(Self {
            tls_enabled: config.tls.is_some(),
            config: Arc::new(config),
            auth,
            store,
        })
    }
}

/// Emit startup warnings based on configuration and runtime state.
fn emit_startup_warnings(app_state: &AppState) {
    if !app_state.tls_enabled && app_state.auth.is_enabled() {
        tracing::warn!(
            "TLS appears disabled but authentication is enabled. Credentials and session cookies travel in clear text unless an HTTPS reverse proxy terminates TLS (ensure it sets X-Forwarded-Proto: https)."
        );
    }
    if let auth::Resolved::Basic { ref user, .. } = app_state.auth.mode
        && user.contains(':')
    {
        tracing::warn!("Basic auth user contains ':', clients cannot send such a user name");
    }
}

/// Initialize application state against the configured storage backend.
#[tracing::instrument(skip_all)]
pub(super) fn initialize_state(config: ProxyConfig) -> eyre::Result<AppState> {
    let store = storage::build_store(&config.bucket, &config.storage)?;
    tracing::info!(
        bucket = %config.bucket,
        endpoint = %config.storage.endpoint,
        "Storage backend ready"
    );
    let app_state = AppState::new(config, store)?;
    emit_startup_warnings(&app_state);
    Ok(app_state)
}
