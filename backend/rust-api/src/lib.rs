use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Protected endpoints (require JWT)
        .nest(
            "/api/v1",
            api_routes()
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                ))
                .layer(cors),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/quizzes/{quiz_id}/retry-settings",
            get(handlers::quizzes::get_retry_settings).put(handlers::quizzes::update_retry_settings),
        )
        .route(
            "/quizzes/{quiz_id}/retry-eligibility",
            get(handlers::quizzes::get_retry_eligibility),
        )
        .route(
            "/quizzes/{quiz_id}/attempts",
            get(handlers::quizzes::list_attempts).post(handlers::quizzes::create_attempt),
        )
        .route(
            "/quizzes/{quiz_id}/retry-analytics",
            get(handlers::quizzes::get_quiz_retry_analytics),
        )
        .route(
            "/attempts/{attempt_id}/grade",
            post(handlers::attempts::grade_attempt),
        )
        .route(
            "/attempts/{attempt_id}/study-materials",
            post(handlers::attempts::complete_study_materials),
        )
        .route(
            "/retry-requests",
            get(handlers::retry_requests::list_pending_requests),
        )
        .route(
            "/retry-requests/{request_id}/review",
            post(handlers::retry_requests::review_request),
        )
        .route(
            "/retry-analytics",
            get(handlers::analytics::get_platform_retry_analytics),
        )
}
