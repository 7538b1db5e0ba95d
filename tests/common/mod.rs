#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use stockroom_api::{config::AppConfig, db, AppState};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "k8Qz!vR2#pLm9Xw4&sT7yB1nHc6JdF3gUe5aWo0iZrVq-Nb_Mx+Ly=Kt*Pj%Gh^Sd";
pub const TEST_USERNAME: &str = "clerk";
pub const TEST_PASSWORD: &str = "correct-horse-battery-staple";

/// Helper harness: the full application router over a fresh SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub access_token: String,
    pub refresh_token: String,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state and a logged-in user.
    pub async fn new() -> Self {
        Self::with_pool_size(1).await
    }

    /// Like `new`, but with a connection pool of `connections` so requests can
    /// really overlap at the database.
    pub async fn with_pool_size(connections: u32) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for sqlite");
        let db_path = db_dir.path().join("stockroom_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_SECRET.to_string(),
            900,
            86_400,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg);
        state
            .auth
            .create_user(TEST_USERNAME, TEST_PASSWORD)
            .await
            .expect("seed test user");

        let router = stockroom_api::build_router(state.clone());

        let mut app = Self {
            router,
            state,
            access_token: String::new(),
            refresh_token: String::new(),
            _db_dir: db_dir,
        };

        let (status, tokens) = app
            .send(
                Method::POST,
                "/auth/login",
                Some(json!({ "username": TEST_USERNAME, "password": TEST_PASSWORD })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {tokens}");
        app.access_token = tokens["access_token"]
            .as_str()
            .expect("access token")
            .to_string();
        app.refresh_token = tokens["refresh_token"]
            .as_str()
            .expect("refresh token")
            .to_string();
        app
    }

    /// Send a request with an optional bearer token; returns the status and parsed JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.raw(method, uri, body, token).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn raw(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, uri, body, Some(&self.access_token)).await
    }

    /// Creates a product and returns its `data` payload.
    pub async fn create_product(&self, name: &str, price: &str, min_stock: i32) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/products",
                Some(json!({
                    "name": name,
                    "description": format!("{name} for tests"),
                    "price": price,
                    "min_stock": min_stock,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create product failed: {body}");
        body["data"].clone()
    }

    pub async fn record_movement(
        &self,
        product_id: &str,
        kind: &str,
        quantity: i64,
    ) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/v1/movements",
            Some(json!({ "product_id": product_id, "kind": kind, "quantity": quantity })),
        )
        .await
    }

    pub async fn stock_of(&self, product_id: &str) -> i64 {
        let (status, body) = self
            .call(Method::GET, &format!("/api/v1/products/{product_id}"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "get product failed: {body}");
        body["data"]["stock_quantity"].as_i64().expect("stock quantity")
    }
}
