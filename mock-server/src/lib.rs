use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// What `/echo` saw of the request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub body_len: usize,
}

/// Metadata returned after storing an upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: Uuid,
    pub size: usize,
    pub content_type: Option<String>,
}

#[derive(Clone)]
struct StoredFile {
    content_type: Option<String>,
    data: Bytes,
}

type Store = Arc<RwLock<HashMap<Uuid, StoredFile>>>;

pub fn app() -> Router {
    let store: Store = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/echo", any(echo))
        .route("/json", get(json_doc))
        .route("/bytes/{len}", get(bytes_of_len))
        .route("/files", post(upload_file))
        .route("/files/{id}", get(download_file))
        .route("/status/{code}", any(status))
        .route("/slow/{ms}", any(slow))
        .route("/malformed", get(malformed))
        .with_state(store)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
        .collect();
    Json(Echo {
        method: method.to_string(),
        query,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
        body_len: body.len(),
    })
}

async fn json_doc() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "x": 1, "name": "courier" }))
}

/// `len` bytes counting up from zero, wrapping at 256.
async fn bytes_of_len(Path(len): Path<usize>) -> impl IntoResponse {
    let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
    ([(header::CONTENT_TYPE, "application/octet-stream")], data)
}

async fn upload_file(
    State(store): State<Store>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<FileInfo>) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let info = FileInfo {
        id: Uuid::new_v4(),
        size: body.len(),
        content_type: content_type.clone(),
    };
    tracing::debug!(id = %info.id, size = info.size, "stored upload");
    store.write().await.insert(
        info.id,
        StoredFile {
            content_type,
            data: body,
        },
    );
    (StatusCode::CREATED, Json(info))
}

async fn download_file(
    State(store): State<Store>,
    Path(id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    let files = store.read().await;
    let file = files.get(&id).cloned().ok_or(StatusCode::NOT_FOUND)?;
    let content_type = file
        .content_type
        .unwrap_or_else(|| "application/octet-stream".to_string());
    Ok(([(header::CONTENT_TYPE, content_type)], file.data).into_response())
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(status) => (status, format!("status {code}")).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "invalid status code").into_response(),
    }
}

async fn slow(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn malformed() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], r#"{"x": "#)
}
