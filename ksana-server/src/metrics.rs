use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{body::Body, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Builds the `/metrics` route. Merge this into the main router rather
/// than serving it on a separate port, so a single bind address exposes
/// both the REST surface and the Prometheus exposition. The `track_metrics`
/// middleware that populates these series is layered separately over the
/// *whole* router (see `routes::build_router`), not just this sub-router,
/// so it observes every request, `/metrics` itself included.
pub fn setup_metrics_router() -> Router {
    let handle = install_recorder();
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS_SECONDS)
        .expect("static bucket list is non-empty")
        .install_recorder()
        .expect("only one Prometheus recorder is installed per process")
}

/// Records request count and latency histograms labeled by method, route
/// template (not the raw path, to keep cardinality bounded), and status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("ksana_http_requests_total", &labels).increment(1);
    metrics::histogram!("ksana_http_request_duration_seconds", &labels).record(latency);

    response
}
