//! # mediarelay: Upload relay for a hosted media service
//!
//! `mediarelay` sits between browser or desktop clients and a third-party asset host
//! (Cloudinary). Clients send one file per request; the relay classifies it, gives it a
//! collision-resistant storage key, forwards it with the account credentials that clients must
//! never see, and answers with the public URL of the stored asset.
//!
//! ## Overview
//!
//! An admin dashboard that attaches product images or supplier PDFs to catalogue entries cannot
//! talk to the asset host directly: doing so would hand out the API secret. The relay owns the
//! credentials and exposes a narrow surface:
//!
//! - `POST /upload/{category}` stores a file into a configured category (folder, accepted MIME
//!   types, whether documents get a page preview)
//! - `POST /upload` does the same for the default category
//! - `OPTIONS` on both answers CORS preflights with `204 No Content`
//! - `GET /healthz` answers `OK`
//!
//! Every relay response carries CORS headers for allowed origins, errors included. Errors are
//! JSON with a `message` field; see [`errors`].
//!
//! ### Request Flow
//!
//! 1. Credentials are resolved from configuration. Any missing setting fails the request with
//!    `400` and the list of missing names, before the body is read.
//! 2. The category is looked up (`404` when unknown) and the body must be `multipart/form-data`
//!    with a part named `file`.
//! 3. The file's MIME type decides its [`ResourceType`](types::ResourceType); the category's
//!    [`FileFilter`](types::FileFilter) decides whether it is accepted.
//! 4. A [`StorageKey`](naming::StorageKey) is derived from the filename and the file is sent to
//!    the [`AssetHost`](asset_host::AssetHost) exactly once.
//! 5. The relay answers `201` with an [`UploadResult`](types::UploadResult).
//!
//! ### Client Side
//!
//! The [`widget`] module is the client half: it checks a dropped file against a filter,
//! compresses images, uploads with a bearer token while reporting progress, and hands the
//! [`UploadResult`](types::UploadResult) to a completion callback.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use mediarelay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = mediarelay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     mediarelay::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod asset_host;
pub mod config;
pub mod cors;
pub mod errors;
pub mod naming;
pub mod telemetry;
pub mod types;
pub mod widget;

#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, warn};

use crate::api::handlers::uploads;
use crate::asset_host::AssetHost;

/// Room for multipart boundaries and part headers on top of the file size limit.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(Arc::new(config))
///     .asset_host(Arc::new(host))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub asset_host: Arc<dyn AssetHost>,
}

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build the relay router.
///
/// The body limit is raised above the configured file size so that oversized files reach the
/// handler and get a `413` with a JSON body instead of a bare rejection.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let relay_routes = Router::new()
        .route(
            "/upload",
            post(uploads::upload_default).options(crate::cors::preflight),
        )
        .route(
            "/upload/{category}",
            post(uploads::upload_to_category).options(crate::cors::preflight),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(state.clone(), crate::cors::cors_middleware));

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(relay_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Main application struct.
///
/// 1. **Create**: [`Application::new`] builds the asset host client and the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, in-flight uploads finish and telemetry
///    is flushed
pub struct Application {
    router: Router,
    config: Arc<Config>,
}

impl Application {
    /// Create a new application instance with the Cloudinary asset host.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let host = asset_host::create_host(&config.asset_host)?;
        Ok(Self::with_host(config, Arc::from(host)))
    }

    /// Create an application around an already constructed asset host.
    pub fn with_host(config: Config, asset_host: Arc<dyn AssetHost>) -> Self {
        debug!("Starting upload relay with configuration: {:#?}", config);

        let missing = config.asset_host.missing();
        if !missing.is_empty() {
            warn!(
                missing = ?missing,
                "Asset host credentials are incomplete; uploads will be refused until they are configured"
            );
        }

        let config = Arc::new(config);
        let state = AppState::builder().config(config.clone()).asset_host(asset_host).build();
        let router = build_router(state);

        Self { router, config }
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Upload relay listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        self.serve_on(listener, shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingHost, create_test_config};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_healthz() {
        let server = Application::with_host(create_test_config(), Arc::new(RecordingHost::default())).into_test_server();

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        assert_eq!(response.text(), "OK");
    }

    #[tokio::test]
    async fn test_application_builds_cloudinary_host() {
        let app = Application::new(create_test_config()).await;
        assert!(app.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let server = Application::with_host(create_test_config(), Arc::new(RecordingHost::default())).into_test_server();
        server.get("/nope").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_router_answers_preflight_without_state_lookup() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let state = AppState::builder()
            .config(Arc::new(create_test_config()))
            .asset_host(Arc::new(RecordingHost::default()) as Arc<dyn AssetHost>)
            .build();

        let response = build_router(state)
            .oneshot(
                Request::options("/upload/products")
                    .header("origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["access-control-allow-origin"], "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_get_on_upload_is_not_allowed() {
        let server = Application::with_host(create_test_config(), Arc::new(RecordingHost::default())).into_test_server();
        server
            .get("/upload")
            .await
            .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }
}
