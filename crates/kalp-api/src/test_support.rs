//! In-process harness: the full REST router over an in-memory database and a
//! fake model endpoint on a loopback port.

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    routing::post,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use kalp_db::Database;
use kalp_gateway::dispatcher::Dispatcher;
use kalp_gateway::relay::Relay;
use kalp_gateway::tokens::TokenAuthority;
use kalp_provider::ModelClient;

use crate::routes::router;
use crate::state::{AppState, AppStateInner};

type Seen = Arc<Mutex<Vec<Value>>>;

pub struct TestApp {
    router: Router,
    seen: Seen,
}

pub fn register_body(email: &str) -> Value {
    json!({
        "username": "ada",
        "displayName": "Ada",
        "email": email,
        "password": "correct-horse",
        "confirmPassword": "correct-horse"
    })
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_model_reply(r#"{"response":"ok","done":true}"#).await
    }

    pub async fn with_model_reply(reply: &'static str) -> Self {
        let seen: Seen = Arc::default();
        let fake = Router::new()
            .route(
                "/api/generate",
                post(move |State(seen): State<Seen>, body: String| async move {
                    seen.lock().unwrap().push(serde_json::from_str(&body).unwrap());
                    reply
                }),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, fake).await.unwrap() });

        let db = Arc::new(Database::open_in_memory().unwrap());
        let model = ModelClient::new(format!("http://{}/api/generate", addr), "test-model");
        let state: AppState = Arc::new(AppStateInner {
            db: db.clone(),
            tokens: TokenAuthority::new("test-secret", db.clone()),
            relay: Arc::new(Relay::new(db, model, 10, None)),
            dispatcher: Dispatcher::new(),
        });

        Self {
            router: router(state),
            seen,
        }
    }

    /// Bodies the fake model endpoint has received, in order.
    pub fn model_requests(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn register_token(&self, email: &str) -> String {
        let (status, body) = self.post("/api/v2/auth/register", None, register_body(email)).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.json("GET", path, token, None).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.json("DELETE", path, token, None).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json("POST", path, token, Some(body)).await
    }

    pub async fn put(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json("PUT", path, token, Some(body)).await
    }

    /// Send a raw body and read the response as text.
    pub async fn raw(&self, method: &str, path: &str, body: &'static str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, String::from_utf8(bytes).unwrap())
    }

    async fn json(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, value)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }
}
