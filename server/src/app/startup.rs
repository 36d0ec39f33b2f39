use tokio::signal;

use crate::{
    app::state::initialize_state,
    config::ProxyConfig,
    http::{create_app, server::tls::setup_tls_config},
};

/// Creates a future that resolves when a shutdown signal is received.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for Ctrl+C");
            core::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => drop(sigterm.recv().await),
            Err(error) => {
                tracing::error!(%error, "failed to create SIGTERM signal handler");
                core::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Start the HTTP server with optional TLS and run it until a shutdown signal.
///
/// In-flight requests get [`ProxyConfig::shutdown_grace`] to finish once the
/// signal arrives.
///
/// # Errors
///
/// Returns an error if the storage backend or TLS setup fails, or the server cannot bind.
pub(crate) async fn start(config: ProxyConfig) -> eyre::Result<()> {
    tracing::info!("Starting HTTP server...");

    let addr = config.listen;
    let grace = config.shutdown_grace;
    let tls_opt = config.tls.clone();

    let app_state = initialize_state(config)?;
    let app = create_app(app_state);

    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown_signal().await;
            tracing::info!(?grace, "Received shutdown, draining connections");
            handle.graceful_shutdown(Some(grace));
        }
    });

    match tls_opt {
        Some(ref tls_cfg) => {
            let rustls_cfg = setup_tls_config(tls_cfg, addr).await?;
            axum_server::bind_rustls(addr, rustls_cfg)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            tracing::info!("Listening on http://{}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
