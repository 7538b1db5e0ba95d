//! Stockroom API Library
//!
//! Product catalog, stock movement ledger and token authentication behind an axum router.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::get,
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::AuthRouterExt;
use crate::db::DatabaseAccess;
use crate::services::{products::ProductService, stock_movements::StockMovementService};

/// Largest JSON body accepted by the v1 API
const API_BODY_LIMIT: usize = 256 * 1024;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub auth: Arc<auth::AuthService>,
    pub products: ProductService,
    pub movements: StockMovementService,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> Self {
        let auth = Arc::new(auth::AuthService::new(
            auth::AuthConfig::from(&config),
            db.clone(),
        ));
        Self {
            products: ProductService::new(db.clone()),
            movements: StockMovementService::new(DatabaseAccess::new(db.clone())),
            auth,
            db,
            config,
        }
    }
}

// Common response wrapper
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Bearer-protected `/api/v1` routes
pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{movements, products};

    Router::new()
        .route(
            "/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/products/low-stock", get(products::list_low_stock))
        .route(
            "/products/:id",
            get(products::get_product)
                .put(products::update_product)
                .delete(products::delete_product),
        )
        .route(
            "/movements",
            get(movements::list_movements).post(movements::create_movement),
        )
        .route(
            "/movements/:id",
            get(movements::get_movement)
                .put(movements::update_movement)
                .delete(movements::delete_movement),
        )
        .with_auth()
        .layer(DefaultBodyLimit::max(API_BODY_LIMIT))
}

/// CORS policy from configuration; no cross-origin access when neither
/// explicit origins nor the permissive override are set
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        let layer = CorsLayer::new().allow_origin(origins);
        // wildcards cannot be combined with credentials
        if cfg.cors_allow_credentials {
            layer
                .allow_methods(AllowMethods::mirror_request())
                .allow_headers(AllowHeaders::mirror_request())
                .allow_credentials(true)
        } else {
            layer.allow_methods(Any).allow_headers(Any)
        }
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            development = cfg.is_development(),
            "Using permissive CORS because explicit origins were not configured"
        );
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Full application router: v1 API, auth, health and docs behind the shared middleware stack
pub fn build_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    let cors = cors_layer(&state.config);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(|| async { "stockroom-api up" }))
        .nest("/api/v1", api_v1_routes())
        .nest("/auth", auth::auth_routes().with_state(auth_service.clone()))
        .nest("/health", health::health_routes(state.db.clone()))
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors)
        // AuthService in request extensions for the bearer middleware
        .layer(Extension(auth_service))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn success_envelope_shape() {
        let value = serde_json::to_value(ApiResponse::success(vec![1, 2])).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], serde_json::json!([1, 2]));
        assert!(value["meta"]["timestamp"].is_string());
        assert!(value["meta"].get("request_id").is_none());
    }

    fn cors_config(origins: Option<&str>, credentials: bool) -> config::AppConfig {
        let mut cfg = config::AppConfig::new(
            "sqlite::memory:".into(),
            "k8Qz!vR2#pLm9Xw4&sT7yB1nHc6JdF3gUe5aWo0iZrVq-Nb_Mx+Ly=Kt*Pj%Gh^Sd".into(),
            900,
            86_400,
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        cfg.cors_allowed_origins = origins.map(str::to_string);
        cfg.cors_allow_credentials = credentials;
        cfg
    }

    async fn preflight(cfg: &config::AppConfig, origin: &str) -> axum::response::Response {
        use axum::{body::Body, http::Request};
        use tower::ServiceExt;

        let app: Router = Router::new()
            .route("/items", axum::routing::post(|| async { "ok" }))
            .layer(cors_layer(cfg));
        app.oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/items")
                .header("origin", origin)
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn explicit_origins_allow_listed_origin_with_credentials() {
        let cfg = cors_config(
            Some("https://a.example.com, ,https://b.example.com"),
            true,
        );

        let response = preflight(&cfg, "https://b.example.com").await;
        let headers = response.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "https://b.example.com"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["access-control-allow-methods"], "POST");
        assert_eq!(headers["access-control-allow-headers"], "authorization");
    }

    #[tokio::test]
    async fn unlisted_origin_gets_no_cors_headers() {
        let cfg = cors_config(Some("https://a.example.com"), false);
        let response = preflight(&cfg, "https://evil.example.com").await;
        assert!(!response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn no_configured_origins_outside_development_denies_cross_origin() {
        let cfg = cors_config(None, false);
        let response = preflight(&cfg, "https://a.example.com").await;
        assert!(!response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
