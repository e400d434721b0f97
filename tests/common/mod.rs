//! In-process fake FrameNote backend for integration tests.
#![allow(dead_code)]

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

use framenote::config::ApiConfig;
use framenote::{ApiClient, LocalStore};

/// A scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Error(u16, &'static str),
    /// JSON sent only after the given number of milliseconds
    Slow(u64, Value),
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(value) | Reply::Slow(_, value) => Json(value).into_response(),
            Reply::Error(code, body) => {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, body.to_string()).into_response()
            }
        }
    }
}

/// Pops scripted replies in order; the last one repeats
#[derive(Default)]
pub struct Script {
    replies: Mutex<VecDeque<Reply>>,
}

impl Script {
    pub fn set(&self, replies: Vec<Reply>) {
        *self.replies.lock().unwrap() = replies.into();
    }

    fn next(&self) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies
                .front()
                .cloned()
                .unwrap_or(Reply::Error(404, "no script"))
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub task_script: Script,
    pub task_calls: AtomicUsize,
    pub task_delay_ms: AtomicU64,

    pub order_script: Script,
    pub order_calls: AtomicUsize,
    pub payment_forms: Mutex<Vec<HashMap<String, String>>>,

    /// Seconds added to the server clock
    pub clock_offset: AtomicI64,
    pub file_downloads: AtomicUsize,

    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub saved_notes: Mutex<Option<String>>,
    pub stream_chunks: Mutex<Vec<Vec<u8>>>,
    pub stream_forms: Mutex<Vec<HashMap<String, String>>>,
    /// Gap between streamed chunks; 10 ms when zero
    pub stream_delay_ms: AtomicU64,
    pub summary_chunks: Mutex<Vec<Vec<u8>>>,
    pub membership_calls: AtomicUsize,
    pub reload_calls: Mutex<Vec<String>>,
    pub preview_requests: Mutex<Vec<Value>>,
}

impl FakeState {
    fn now(&self) -> i64 {
        let real = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        real + self.clock_offset.load(Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    pub base: String,
    pub state: Arc<FakeState>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            state,
        }
    }

    /// Client against this backend with a fresh in-memory store
    pub fn client(&self) -> ApiClient {
        self.client_with_timeout(5)
    }

    /// Client whose whole-request deadline is `secs`
    pub fn client_with_timeout(&self, secs: u64) -> ApiClient {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut config = ApiConfig::new(self.base.clone());
        config.timeout_secs = secs;
        ApiClient::new(config, store).unwrap()
    }
}

pub fn task_json(status: &str) -> Reply {
    Reply::Json(json!({
        "task_id": "task-1",
        "status": status,
        "current_step": "asr",
        "progress": 0.5,
    }))
}

pub fn order_json(status: &str) -> Reply {
    Reply::Json(json!({
        "id": 7,
        "order_no": "ORD-1",
        "status": status,
        "plan": "monthly",
        "amount": 19.9,
        "currency": "CNY",
    }))
}

fn router(state: Arc<FakeState>) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/process/:id", post(process))
        .route("/api/status/:id", get(task_status))
        .route("/api/download-status/:id", get(task_status))
        .route("/api/notes/:id", get(get_notes).put(put_notes))
        .route("/api/agent/knowledge/reload/:id", post(reload_knowledge))
        .route("/api/preview-video", post(preview_video))
        .route("/api/stream-summary/:id", get(stream_summary))
        .route("/api/export/:id/:format", get(export))
        .route("/api/files/sign", post(sign))
        .route("/api/files/download", get(download))
        .route("/api/files/slow", get(slow_file))
        .route("/api/files/broken", get(broken_file))
        .route("/api/agent/stream", post(agent_stream))
        .route("/api/payment/create", post(create_payment))
        .route("/api/payment/order", get(order_status))
        .route("/api/auth/login-password", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/payment/membership", get(membership))
        .route("/api/membership/plans", get(membership_plans))
        .route("/api/fail/500", get(fail_500))
        .route("/api/fail/503", get(fail_503))
        .route("/api/echo-auth", get(echo_auth))
        .route("/api/text", get(plain_text))
        .with_state(state)
}

async fn upload(State(state): State<Arc<FakeState>>, mut multipart: Multipart) -> Response {
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();

        if !filename.ends_with(".mp4") {
            return (StatusCode::BAD_REQUEST, "unsupported video format").into_response();
        }
        state
            .uploads
            .lock()
            .unwrap()
            .push((filename.clone(), content_type, bytes.len()));
        return Json(json!({
            "task_id": "task-1",
            "filename": filename,
            "message": "uploaded",
        }))
        .into_response();
    }
    (StatusCode::BAD_REQUEST, "missing file").into_response()
}

async fn process(Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "task_id": id, "message": "started", "options": body }))
}

async fn task_status(State(state): State<Arc<FakeState>>, Path(_id): Path<String>) -> Reply {
    state.task_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.task_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let reply = state.task_script.next();
    if let Reply::Slow(ms, _) = &reply {
        tokio::time::sleep(Duration::from_millis(*ms)).await;
    }
    reply
}

async fn get_notes(Path(id): Path<String>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        format!("# Notes for {}\n\n- point", id),
    )
        .into_response()
}

async fn put_notes(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Json<Value> {
    let content = body["content"].as_str().map(str::to_string);
    *state.saved_notes.lock().unwrap() = content;
    Json(json!({ "message": "saved" }))
}

async fn reload_knowledge(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Json<Value> {
    state.reload_calls.lock().unwrap().push(id.clone());
    Json(json!({ "message": format!("knowledge for {} reloaded", id), "status": "success" }))
}

async fn preview_video(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Reply {
    let url = body["url"].as_str().unwrap_or_default().to_string();
    state.preview_requests.lock().unwrap().push(body);
    if !url.starts_with("https://") {
        return Reply::Error(400, "unsupported url");
    }
    Reply::Json(json!({
        "platform": "bilibili",
        "title": "Lecture 1",
        "duration": 3600.5,
        "thumbnail": null,
        "uploader": "prof",
        "view_count": 1024,
    }))
}

async fn stream_summary(State(state): State<Arc<FakeState>>, Path(_id): Path<String>) -> Response {
    let chunks = state.summary_chunks.lock().unwrap().clone();
    let body = futures_util::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Infallible>(Bytes::from(chunk))
    });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn export(Path((id, format)): Path<(String, String)>) -> Response {
    if format == "markdown" {
        (
            [(header::CONTENT_TYPE, "text/markdown")],
            format!("# Export {}\n", id),
        )
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "unsupported export format").into_response()
    }
}

async fn sign(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Reply {
    let task_id = body["task_id"].as_str().unwrap_or_default().to_string();
    let path = body["path"].as_str().unwrap_or_default().to_string();
    let expires_in = body["expires_in"].as_i64().unwrap_or(300);
    if task_id.is_empty() || path.is_empty() {
        return Reply::Error(400, "missing task_id or path");
    }
    let exp = state.now() + expires_in.clamp(10, 3600);
    let sig = format!("{:x}", exp.wrapping_mul(2654435761) ^ task_id.len() as i64);
    Reply::Json(json!({
        "url": format!("/api/files/download?task_id={}&p={}&exp={}&sig={}", task_id, path, exp, sig)
    }))
}

async fn download(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.file_downloads.fetch_add(1, Ordering::SeqCst);
    let exp: i64 = query.get("exp").and_then(|v| v.parse().ok()).unwrap_or(0);
    if state.now() > exp {
        return (StatusCode::FORBIDDEN, "link expired").into_response();
    }
    let path = query.get("p").cloned().unwrap_or_default();
    format!("FILE:{}", path).into_response()
}

/// Five 4-byte chunks, 400 ms apart
async fn slow_file() -> Response {
    let body = futures_util::stream::iter(0..5u8).then(|i| async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Ok::<_, Infallible>(Bytes::from(vec![b'a' + i; 4]))
    });
    Body::from_stream(body).into_response()
}

/// Sends 8 bytes, then aborts the body
async fn broken_file() -> Response {
    let body = futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"partial!")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream reset")),
    ]);
    Body::from_stream(body).into_response()
}

async fn agent_stream(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.stream_forms.lock().unwrap().push(form);
    let chunks = state.stream_chunks.lock().unwrap().clone();
    let delay = match state.stream_delay_ms.load(Ordering::SeqCst) {
        0 => 10,
        ms => ms,
    };
    let body = futures_util::stream::iter(chunks).then(move |chunk| async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, Infallible>(Bytes::from(chunk))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn create_payment(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    state.payment_forms.lock().unwrap().push(form);
    Json(json!({
        "payment_id": 99,
        "order_no": "ORD-1",
        "amount": 19.9,
        "currency": "CNY",
        "payment_url": "https://pay.example/ORD-1",
        "expires_at": "2026-10-17T12:00:00",
    }))
}

async fn order_status(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Reply {
    state.order_calls.fetch_add(1, Ordering::SeqCst);
    if query.get("order_no").map(String::as_str) != Some("ORD-1") {
        return Reply::Error(404, "order not found");
    }
    state.order_script.next()
}

async fn login(Json(body): Json<Value>) -> Reply {
    if body["password"] != "secret" {
        return Reply::Error(401, "wrong password");
    }
    Reply::Json(json!({
        "token": "tok-1",
        "user": { "id": 1, "phone": body["phone"], "nickname": "tester" },
    }))
}

async fn logout() -> Reply {
    Reply::Error(502, "gateway down")
}

async fn membership(State(state): State<Arc<FakeState>>) -> Json<Value> {
    state.membership_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "role": "pro", "expires_at": "2027-01-01T00:00:00" }))
}

async fn membership_plans() -> Json<Value> {
    Json(json!({
        "plans": [
            { "id": "monthly", "name": "Monthly", "price": 19.9 },
            { "id": "yearly", "name": "Yearly", "price": 199.0 },
        ]
    }))
}

async fn fail_500() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

async fn fail_503() -> Response {
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}

async fn echo_auth(headers: HeaderMap) -> Json<Value> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({ "authorization": auth }))
}

async fn plain_text() -> &'static str {
    "hello"
}
