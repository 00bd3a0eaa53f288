//! HTTP surface over the resolver and the account lifecycle.

pub mod error;
mod handlers;
pub mod openapi;

pub use error::ApiError;
pub use openapi::openapi;

use crate::{
    account::{AccountLifecycle, Accounts},
    auth::CredentialResolver,
    store::MetadataStore,
    token::TokenCodec,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use handlers::{health, password_reset, profile, signin, signout, signup, verification};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, error, info, Span};
use ulid::Ulid;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Accounts,
    pub resolver: CredentialResolver,
    pub lifecycle: AccountLifecycle,
    /// Sign-in and sign-out audit trail.
    pub metadata: Arc<dyn MetadataStore>,
    pub codec: Arc<TokenCodec>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("resolver", &self.resolver)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Routes with the state attached, without the transport layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/signin", post(signin::signin))
        .route("/signout", post(signout::signout))
        .route("/signup", post(signup::signup))
        .route("/verification", post(verification::verification))
        .route("/password-reset", post(password_reset::password_reset))
        .route("/profile", get(profile::profile))
        .route("/openapi.json", get(openapi::document))
        .layer(Extension(state))
}

/// Serve the API until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot be bound, the CORS origin is not a valid
/// header value, or the server fails.
pub async fn new(port: u16, state: AppState, cors_origin: Option<String>) -> Result<()> {
    let allow_origin = match cors_origin {
        Some(origin) => AllowOrigin::exact(
            HeaderValue::from_str(&origin).context("invalid CORS origin")?,
        ),
        None => AllowOrigin::from(Any),
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(allow_origin);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", err);
                std::future::pending::<()>().await;
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let path = request.uri().path();
    let method = request.method().as_str();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, path, request_id)
}
