#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use parley_api::media::MediaStore;
use parley_api::{AppState, AppStateInner, Limits};
use parley_db::Database;
use parley_gateway::{Dispatcher, GatewayConfig};
use parley_types::api::Claims;

pub const SECRET: &str = "integration-test-secret";

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;

pub fn username(user_id: i64) -> String {
    match user_id {
        ALICE => "alice".to_string(),
        BOB => "bob".to_string(),
        CAROL => "carol".to_string(),
        other => format!("user{other}"),
    }
}

pub fn token(user_id: i64) -> String {
    let claims = Claims {
        sub: user_id,
        username: username(user_id),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub media_dir: TempDir,
}

/// In-memory store with alice, bob and carol already known.
pub async fn app() -> TestApp {
    app_with(Limits::default(), GatewayConfig::default()).await
}

pub async fn app_with(limits: Limits, gateway: GatewayConfig) -> TestApp {
    let media_dir = tempfile::tempdir().unwrap();
    let media = MediaStore::new(media_dir.path().to_path_buf(), "/media").await.unwrap();

    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        dispatcher: Dispatcher::new(gateway),
        media,
        jwt_secret: SECRET.to_string(),
        limits,
    });
    for id in [ALICE, BOB, CAROL] {
        state.db.ensure_user(id, &username(id)).unwrap();
    }

    TestApp {
        router: parley_api::router(state.clone()),
        state,
        media_dir,
    }
}

impl TestApp {
    pub async fn call(&self, method: Method, uri: &str, user: i64, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(req.body(body).unwrap()).await
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        // Extractor rejections come back as plain text
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user: i64) -> (StatusCode, Value) {
        self.call(Method::GET, uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: i64, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, user, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: i64) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, user, None).await
    }

    /// Group room owned by `owner`, returning its id.
    pub async fn group(&self, owner: i64, members: &[i64]) -> i64 {
        let (status, body) = self
            .post("/rooms/group", owner, serde_json::json!({ "name": "team", "member_ids": members }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["room"]["id"].as_i64().unwrap()
    }

    pub async fn say(&self, room_id: i64, user: i64, content: &str) -> Value {
        let (status, body) = self
            .post(
                &format!("/rooms/{room_id}/messages"),
                user,
                serde_json::json!({ "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}
