//! HTTP surface: login, identity, tenant directory and QR enrollment.

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::SERVER, HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
mod openapi;

pub use openapi::{openapi, ApiDoc};

use crate::authz::AccessAuthorizer;
use crate::directory::DirectoryBackend;
use crate::session::SessionManager;
use crate::totp::TotpVerifier;

/// Everything the handlers need, shared through an `Extension`.
pub struct ApiState {
    pub directory: Arc<dyn DirectoryBackend>,
    pub authorizer: AccessAuthorizer,
    pub sessions: SessionManager,
    pub totp: TotpVerifier,
    /// Issuer label shown in authenticator apps.
    pub totp_issuer: String,
}

impl ApiState {
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryBackend>,
        sessions: SessionManager,
        totp: TotpVerifier,
        totp_issuer: &str,
    ) -> Self {
        Self {
            authorizer: AccessAuthorizer::new(Arc::clone(&directory), totp.clone()),
            directory,
            sessions,
            totp,
            totp_issuer: totp_issuer.to_string(),
        }
    }
}

#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/login", post(handlers::login::login))
        .route("/info", get(handlers::info::info))
        .route("/clients", get(handlers::clients::clients))
        .route("/qrcode", post(handlers::qrcode::qrcode))
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
                .layer(SetResponseHeaderLayer::if_not_present(
                    SERVER,
                    HeaderValue::from_static(crate::APP_USER_AGENT),
                ))
                .layer(Extension(state)),
        )
}

/// Serve until `shutdown` resolves, then let in-flight requests drain.
///
/// # Errors
/// Return error if the port cannot be bound or the server fails.
pub async fn serve<F>(port: u16, state: Arc<ApiState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
