//! # filedrop: multipart uploads to a local directory
//!
//! `filedrop` is a small HTTP service with one job: accept a text message and any number of
//! files as `multipart/form-data` on `POST /upload`, write the files into a local directory
//! under the names the client gave them, and answer with the message plus where each file went.
//!
//! ```text
//! POST /upload  message=hello, files=@a.txt
//! 200 {"message": "hello", "files": [{"filename": "a.txt", "path": "uploads/a.txt"}]}
//! ```
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). The multipart body is parsed into
//! an [`api::models::uploads::UploadForm`] before the handler runs, so a request without a
//! `message` never reaches the upload directory. The handler passes the form to
//! [`uploads::UploadDir::handle_upload`], which creates the directory when needed and writes the
//! attachments in submission order.
//!
//! Nothing is kept between requests. The only shared resource is the upload directory itself:
//! by default a second upload with the same name replaces the first (see
//! [`config::CollisionPolicy`] for the alternatives).
//!
//! Besides `/upload` the router serves `/healthz`, the OpenAPI document at `/openapi.json`, an
//! API reference at `/docs`, and, when enabled, Prometheus metrics at `/internal/metrics`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use filedrop::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = filedrop::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     filedrop::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod config;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod uploads;

#[cfg(test)]
mod test_utils;

use crate::config::CorsOrigin;
use crate::openapi::ApiDoc;
use crate::uploads::UploadDir;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::{
    Json, Router,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// Cloned into every request. Holds no mutable state.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .uploads(UploadDir::from_config(&config))
///     .config(config)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub uploads: UploadDir,
}

/// Create CORS layer from configuration
///
/// A wildcard origin cannot be sent as `*` when credentials are allowed, so in that case the
/// request's own origin, method and headers are echoed back instead.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let mut cors = match (cors_config.allows_any_origin(), cors_config.allow_credentials) {
        (true, true) => CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
        (true, false) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
        (false, allow_credentials) => {
            let mut origins = Vec::new();
            for origin in &cors_config.allowed_origins {
                if let CorsOrigin::Url(url) = origin {
                    // Browsers send the bare origin, without the trailing slash `Url` adds
                    origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
                }
            }
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(allow_credentials)
        }
    };

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `POST /upload` (request body limit disabled)
/// - `GET /healthz`
/// - `GET /openapi.json` and the `/docs` API reference
/// - `GET /internal/metrics` when `enable_metrics` is set
/// - CORS and request tracing on everything
///
/// # Errors
///
/// Returns an error if the CORS configuration contains an origin that is not a valid header value.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route(
            "/upload",
            post(api::handlers::uploads::upload_files).layer(DefaultBodyLimit::disable()),
        )
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance from a loaded configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting filedrop with configuration: {:#?}", config);

        let app_state = AppState::builder()
            .uploads(UploadDir::from_config(&config))
            .config(config.clone())
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "filedrop listening on http://{}, storing uploads in {}",
            listener.local_addr()?,
            self.config.upload_dir.display()
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::config::CorsOrigin;
    use crate::test_utils::{create_test_config, create_test_server};
    use axum::http::{Method, StatusCode};
    use axum_test::multipart::{MultipartForm, Part};

    #[tokio::test]
    async fn test_application_integration() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = create_test_config(&temp_dir.path().join("uploads"));

        let app = crate::Application::new(config);
        assert!(app.is_ok(), "Application::new should succeed");
        let server = app.unwrap().into_test_server();

        let health_response = server.get("/healthz").await;
        assert_eq!(health_response.status_code().as_u16(), 200);
        assert_eq!(health_response.text(), "OK");

        let upload_response = server
            .post("/upload")
            .multipart(
                MultipartForm::new()
                    .add_text("message", "hello")
                    .add_part("files", Part::bytes(b"abc".as_slice()).file_name("a.txt")),
            )
            .await;
        upload_response.assert_status_ok();
        assert_eq!(std::fs::read(temp_dir.path().join("uploads").join("a.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_openapi_endpoints() {
        let temp_dir = tempfile::tempdir().unwrap();
        let server = create_test_server(create_test_config(temp_dir.path()));

        let openapi_response = server.get("/openapi.json").await;
        assert_eq!(openapi_response.status_code().as_u16(), 200);
        let content = openapi_response.text();
        assert!(content.contains("\"openapi\""));
        assert!(content.contains("/upload"));
        assert!(content.contains("multipart/form-data"));

        let docs_response = server.get("/docs").await;
        assert_eq!(docs_response.status_code().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_upload_route_rejects_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let server = create_test_server(create_test_config(temp_dir.path()));

        let response = server.get("/upload").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight_any_origin_with_credentials() {
        let temp_dir = tempfile::tempdir().unwrap();
        let server = create_test_server(create_test_config(temp_dir.path()));

        let response = server
            .method(Method::OPTIONS, "/upload")
            .add_header("origin", "http://localhost:3000")
            .add_header("access-control-request-method", "POST")
            .add_header("access-control-request-headers", "x-requested-with")
            .await;

        response.assert_status_ok();
        let headers = response.headers();
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "http://localhost:3000");
        assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
        assert_eq!(headers.get("access-control-allow-methods").unwrap(), "POST");
        assert_eq!(headers.get("access-control-allow-headers").unwrap(), "x-requested-with");
    }

    #[tokio::test]
    async fn test_cors_simple_request_echoes_origin() {
        let temp_dir = tempfile::tempdir().unwrap();
        let server = create_test_server(create_test_config(temp_dir.path()));

        let response = server
            .post("/upload")
            .add_header("origin", "https://elsewhere.example")
            .multipart(MultipartForm::new().add_text("message", "hi"))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "https://elsewhere.example"
        );
    }

    #[tokio::test]
    async fn test_cors_wildcard_without_credentials() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.cors.allow_credentials = false;
        let server = create_test_server(config);

        let response = server
            .method(Method::OPTIONS, "/upload")
            .add_header("origin", "http://localhost:3000")
            .add_header("access-control-request-method", "POST")
            .await;

        assert_eq!(response.headers().get("access-control-allow-origin").unwrap(), "*");
        assert!(response.headers().get("access-control-allow-credentials").is_none());
    }

    #[tokio::test]
    async fn test_cors_explicit_origins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com".parse().unwrap())];
        let server = create_test_server(config);

        let allowed = server
            .method(Method::OPTIONS, "/upload")
            .add_header("origin", "https://app.example.com")
            .add_header("access-control-request-method", "POST")
            .await;
        assert_eq!(allowed.headers().get("access-control-allow-origin").unwrap(), "https://app.example.com");

        let denied = server
            .method(Method::OPTIONS, "/upload")
            .add_header("origin", "https://evil.example")
            .add_header("access-control-request-method", "POST")
            .await;
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_disabled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.enable_metrics = false;
        let server = create_test_server(config);

        let metrics_response = server.get("/internal/metrics").await;
        metrics_response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_enabled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config(temp_dir.path());
        config.enable_metrics = true;
        let server = create_test_server(config);

        // Generate at least one recorded request
        server.get("/healthz").await;

        let metrics_response = server.get("/internal/metrics").await;
        assert_eq!(metrics_response.status_code().as_u16(), 200);
        let metrics_content = metrics_response.text();
        assert!(metrics_content.contains("# HELP") || metrics_content.contains("# TYPE"));
    }
}
