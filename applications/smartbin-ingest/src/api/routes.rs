use super::handlers::{bins, health, AppState};
use axum::{extract::Request, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        .route(
            "/api/v1/bins",
            get(bins::list_bins).post(bins::post_reading),
        )
        .route("/api/v1/bins/{bin_id}", get(bins::get_bin))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::span!(
                        Level::INFO,
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(
                    |response: &axum::response::Response,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        tracing::event!(Level::DEBUG, status = %response.status(), latency = ?latency, "request completed");
                    },
                ),
        )
}
