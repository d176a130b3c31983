//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // Upload size is enforced by the handler against `max_upload_size`, so
    // oversize bodies get the size-limit error rather than a bare 413.
    let upload_routes = Router::new()
        .route(
            "/api/files/",
            get(handlers::list_files).post(handlers::upload_file),
        )
        .route("/api/files/upload/", post(handlers::upload_file))
        .layer(DefaultBodyLimit::disable());

    let api_routes = Router::new()
        .route("/api/files/storage_stats/", get(handlers::storage_stats))
        .route(
            "/api/files/{id}/",
            get(handlers::get_file).delete(handlers::delete_file),
        )
        // Health check (unauthenticated for load balancers)
        .route("/api/health", get(handlers::health_check));

    let mut router = Router::new().merge(upload_routes).merge(api_routes);

    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
