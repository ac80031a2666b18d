//! Fixture HTTP server for exercising the request builder end to end.
//!
//! Serves a json-server style `/user` collection plus a few special routes:
//! `/image` (PNG bytes), `/timeout` (slow response), `/cookie` (echoes
//! the request cookies and sets one of its own), `/cookie/clear` (expires
//! `key1`) and `/gzip` (compressed JSON when the client accepts it).

use std::{collections::HashMap, io::Write, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

/// 1x1 transparent PNG.
pub const IMAGE_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Server settings, read from the environment by the binary.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// How long `/timeout` waits before answering.
    pub timeout_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            timeout_delay: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// `PORT` and `TIMEOUT_DELAY_MS`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let timeout_delay = std::env::var("TIMEOUT_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout_delay);
        Self { port, timeout_delay }
    }
}

pub type Db = Arc<RwLock<Vec<Value>>>;

#[derive(Clone)]
struct AppState {
    db: Db,
    timeout_delay: Duration,
}

/// Users every fresh server starts with.
pub fn seed() -> Vec<Value> {
    vec![
        json!({ "id": 1, "name": "John", "age": 30 }),
        json!({ "id": 2, "name": "Jane", "age": 25 }),
    ]
}

pub fn app() -> Router {
    app_with(&Config::default())
}

pub fn app_with(config: &Config) -> Router {
    let state = AppState {
        db: Arc::new(RwLock::new(seed())),
        timeout_delay: config.timeout_delay,
    };
    Router::new()
        .route("/user", get(list_users).post(create_user))
        .route(
            "/user/{id}",
            get(get_user).put(replace_user).patch(update_user).delete(delete_user),
        )
        .route("/image", get(image))
        .route("/timeout", get(timeout))
        .route("/cookie", get(cookie))
        .route("/cookie/clear", get(clear_cookie))
        .route("/gzip", get(gzip))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with(listener: TcpListener, config: &Config) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

fn id_of(user: &Value) -> Option<i64> {
    user.get("id").and_then(Value::as_i64)
}

/// Compare a record field with a query-string value the way json-server
/// does: by string form.
fn field_matches(user: &Value, field: &str, expected: &str) -> bool {
    match user.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let users = state.db.read().await;
    let matched = users
        .iter()
        .filter(|user| filter.iter().all(|(field, value)| field_matches(user, field, value)))
        .cloned()
        .collect();
    Json(matched)
}

async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> (StatusCode, Json<Value>) {
    let users = state.db.read().await;
    match users.iter().find(|user| id_of(user) == Some(id)) {
        Some(user) => (StatusCode::OK, Json(user.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({}))),
    }
}

async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    let mut users = state.db.write().await;
    let mut user = input;
    let id = match user.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => users.iter().filter_map(id_of).max().unwrap_or(0) + 1,
    };
    if users.iter().any(|u| id_of(u) == Some(id)) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "duplicate id" })));
    }
    user.insert("id".to_string(), json!(id));
    let user = Value::Object(user);
    debug!(id, "user created");
    users.push(user.clone());
    (StatusCode::CREATED, Json(user))
}

async fn replace_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    let mut users = state.db.write().await;
    let Some(user) = users.iter_mut().find(|user| id_of(user) == Some(id)) else {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    };
    let mut replacement = input;
    replacement.insert("id".to_string(), json!(id));
    *user = Value::Object(replacement);
    (StatusCode::OK, Json(user.clone()))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(input): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    let mut users = state.db.write().await;
    let Some(user) = users.iter_mut().find(|user| id_of(user) == Some(id)) else {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    };
    if let Value::Object(fields) = user {
        for (key, value) in input {
            if key != "id" {
                fields.insert(key, value);
            }
        }
    }
    (StatusCode::OK, Json(user.clone()))
}

async fn delete_user(State(state): State<AppState>, Path(id): Path<i64>) -> (StatusCode, Json<Value>) {
    let mut users = state.db.write().await;
    let before = users.len();
    users.retain(|user| id_of(user) != Some(id));
    if users.len() == before {
        return (StatusCode::NOT_FOUND, Json(json!({})));
    }
    debug!(id, "user deleted");
    (StatusCode::OK, Json(json!({})))
}

async fn image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], IMAGE_PNG)
}

async fn timeout(State(state): State<AppState>) -> &'static str {
    tokio::time::sleep(state.timeout_delay).await;
    "NO_TIMEOUT"
}

async fn cookie(headers: HeaderMap) -> impl IntoResponse {
    let received = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ([(header::SET_COOKIE, "key2=value2; Path=/")], received)
}

/// Expires `key1` on the client.
async fn clear_cookie() -> impl IntoResponse {
    ([(header::SET_COOKIE, "key1=; Max-Age=0; Path=/")], "")
}

fn gzip_bytes(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Echoes the `Accept-Encoding` it received, gzip-compressed if allowed.
async fn gzip(headers: HeaderMap) -> Response {
    let accepted = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let payload = json!({ "acceptEncoding": accepted }).to_string();
    if !accepted.contains("gzip") {
        return ([(header::CONTENT_TYPE, "application/json")], payload).into_response();
    }
    match gzip_bytes(payload.as_bytes()) {
        Ok(compressed) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CONTENT_ENCODING, "gzip"),
            ],
            compressed,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_has_sequential_ids() {
        let ids: Vec<_> = seed().iter().filter_map(id_of).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn field_matches_by_string_form() {
        let user = json!({ "id": 3, "name": "FooBar", "age": 35 });
        assert!(field_matches(&user, "name", "FooBar"));
        assert!(field_matches(&user, "age", "35"));
        assert!(!field_matches(&user, "age", "36"));
        assert!(!field_matches(&user, "email", "x"));
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.timeout_delay, Duration::from_millis(2000));
    }

    #[test]
    fn gzip_bytes_has_gzip_magic() {
        let compressed = gzip_bytes(b"{}").unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn image_is_png() {
        assert_eq!(&IMAGE_PNG[1..4], b"PNG");
    }
}
