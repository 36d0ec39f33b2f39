//! Library entry for the `gcsproxy` server.
//!
//! Exposes `inner_main` so the workspace-level binary can call into the proxy logic,
//! plus [`AppState`] and [`create_app`] so the router can be driven in-process.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod http;
pub mod storage;

use std::sync::Once;

use eyre::Result;
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, Command, LogFormat};

pub use app::AppState;
pub use http::create_app;

static INIT_TRACING: Once = Once::new();
static INIT_RUSTLS: Once = Once::new();

/// Installs the OpenSSL backed rustls provider used by the HTTP clients and the TLS listener.
///
/// Idempotent; a provider installed earlier by the embedding program is kept.
pub fn install_crypto_provider() {
    INIT_RUSTLS.call_once(|| {
        drop(rustls_openssl::default_provider().install_default());
    });
}

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// The proxy's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Serve(args) => {
            init_tracing(args.log_format);
            install_crypto_provider();

            let config = config::from_args(&args)?;
            // Zeroizes the raw secrets, the validated config holds its own copies.
            drop(args);

            let startup_span = tracing::info_span!(
                "gcsproxy.startup",
                bucket = %config.bucket,
                auth = config.auth.name(),
                pid = ?std::process::id(),
                version = env!("CARGO_PKG_VERSION"),
            );

            async {
                info!(listen = %config.listen, tls = config.tls.is_some(), "Starting gcsproxy");
                app::start(config).await
            }
            .instrument(startup_span)
            .await
        }
    }
}
