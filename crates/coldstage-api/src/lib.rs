//! # coldstage-api
//!
//! HTTP surface of coldstage: job intake and polling, token-gated artifact
//! download, and admin operations over tokens and the queue.

pub mod error;
pub mod handlers;
pub mod intake;

use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use error::ApiError;
pub use handlers::AppState;
pub use intake::IntakeService;

use coldstage_core::defaults::REQUEST_BODY_LIMIT;

/// Time-ordered UUIDv7 request correlation IDs, attached to every request
/// and echoed back in the response headers.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Build the application router over any store implementations.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", post(handlers::submit_job))
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/download/:token", get(handlers::download))
        .route("/admin/jobs/:id/tokens", get(handlers::list_job_tokens))
        .route("/admin/tokens/:token/disable", post(handlers::disable_token))
        .route(
            "/admin/tokens/:token/reactivate",
            post(handlers::reactivate_token),
        )
        .route("/admin/queue", get(handlers::queue_stats))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .with_state(state)
}
