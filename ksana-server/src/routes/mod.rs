pub mod jobs;

use std::future::ready;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{require_api_key, ApiKeyStore};
use crate::metrics::{setup_metrics_router, track_metrics};
use crate::state::AppState;

/// Assembles the full service router: the authenticated `/jobs*` surface,
/// the unauthenticated `/health` and `/metrics` endpoints, CORS, a tracing
/// span per request, and the metrics-collecting middleware over all of it.
pub fn build_router(state: AppState, api_keys: ApiKeyStore, cors_origins: Vec<String>) -> Router {
    let protected = Router::new()
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route(
            "/jobs/:id",
            get(jobs::get).patch(jobs::update).delete(jobs::delete),
        )
        .route("/jobs/:id/run-now", post(jobs::run_now))
        .route("/jobs/:id/pause", post(jobs::pause))
        .route("/jobs/:id/resume", post(jobs::resume))
        .with_state(state.clone())
        .route_layer(middleware::from_fn_with_state(api_keys, require_api_key));

    let health = state.health.clone();
    let unprotected = Router::new().route("/health", get(move || ready(health.get_status())));

    Router::new()
        .merge(protected)
        .merge(unprotected)
        .merge(setup_metrics_router())
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_metrics))
}

fn build_cors(origins: Vec<String>) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(tower_http::cors::Any)
}
