use axum::{
    Router,
    extract::FromRef as _,
    http::header::{AUTHORIZATION, COOKIE},
    middleware::{self as ax_middleware},
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{ServiceBuilderExt as _, request_id::MakeRequestUuid, trace::TraceLayer};

use crate::{
    app::AppState,
    http::{
        auth::{self, OIDC_PATH},
        objects,
    },
};

/// Creates the object routes, gated by the auth middleware, plus the OIDC routes when enabled.
///
/// The gate itself exempts everything under [`auth::PROXY_PATH_PREFIX`], so the
/// OIDC routes stay reachable without a session.
pub(crate) fn create_app_router(app_state: &AppState) -> Router<AppState> {
    let mut router = Router::new()
        .route("/", get(objects::serve_root))
        .route("/{*path}", get(objects::serve_path));

    if let Some(oidc) = auth::oidc_routes(&app_state.auth, app_state.tls_enabled) {
        router = router.nest(OIDC_PATH, oidc);
    }

    router.layer(ax_middleware::from_fn_with_state(
        auth::LayerState::from_ref(app_state),
        auth::require,
    ))
}

/// Builds the complete application with its middleware stack.
pub fn create_app(app_state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .sensitive_headers([AUTHORIZATION, COOKIE])
        .set_x_request_id(MakeRequestUuid)
        .propagate_x_request_id()
        .layer(TraceLayer::new_for_http());

    create_app_router(&app_state)
        .with_state(app_state)
        .layer(middleware_stack)
}
