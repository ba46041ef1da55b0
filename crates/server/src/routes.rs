//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the registry router. Route order is significant: the
/// deeper tarball routes must win over the document routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/{name}", get(handlers::document))
        .route("/{name}/{version}", get(handlers::document_version))
        .route("/{name}/{version}/{tarball}", get(handlers::tarball))
        .route(
            "/{name}/{version}/{tarball}/{extra}",
            get(handlers::scoped_tarball),
        )
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
