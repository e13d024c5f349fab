use std::sync::Arc;

use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;
use utoipa::OpenApi;

use crate::auth::{self, AuthConfig, AuthKit, MemoryDirectory, guard};

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::initiate,
        handlers::auth::callback,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::session,
    ),
    components(schemas(
        handlers::health::Health,
        handlers::auth::SessionResponse,
        guard::GuardRejection,
    )),
    tags(
        (name = "auth", description = "Strategy-dispatching authentication API"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Build the application router around a wired [`AuthKit`].
///
/// The cross-origin cookie guard wraps every route, the health probe
/// included; nothing reads a cookie before it runs.
#[must_use]
pub fn router(kit: AuthKit) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/auth/session", get(handlers::auth::session))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/auth/:strategy",
            get(handlers::auth::initiate).post(handlers::auth::login),
        )
        .route("/auth/:strategy/callback", get(handlers::auth::callback))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(middleware::from_fn(guard::prevent_cross_origin_cookie))
                .layer(Extension(kit)),
        )
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the authentication core cannot be wired or the
/// listener fails to bind.
pub async fn new(port: u16, config: &AuthConfig) -> Result<()> {
    let kit = auth::build_kit(config, Arc::new(MemoryDirectory::new()))?;
    let app = router(kit);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
