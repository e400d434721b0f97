use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ApiError;
use crate::config::ApiConfig;
use crate::storage::LocalStore;

/// Body attached to a request
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(reqwest::multipart::Form),
    Text { content: String, content_type: String },
}

/// Per-request options for `ApiClient::request`
pub struct RequestOptions {
    body: Option<RequestBody>,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    authorize: bool,
    deadline: Deadline,
}

/// Whole-request time limit
#[derive(Debug, Clone, Copy, PartialEq)]
enum Deadline {
    /// `ApiConfig::timeout`
    Configured,
    Custom(Duration),
    /// Only the client's connect and read timeouts apply
    Unbounded,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            body: None,
            headers: Vec::new(),
            query: Vec::new(),
            authorize: true,
            deadline: Deadline::Configured,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidInput(format!("unserializable request body: {}", e)))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn multipart(mut self, form: reqwest::multipart::Form) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    pub fn text(mut self, content: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text {
            content: content.into(),
            content_type: content_type.into(),
        });
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Do not attach the persisted bearer token
    pub fn anonymous(mut self) -> Self {
        self.authorize = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Deadline::Custom(timeout);
        self
    }

    /// Transfers and event streams: no whole-request deadline, the body may
    /// take as long as it keeps arriving within the read timeout.
    pub fn streaming(mut self) -> Self {
        self.deadline = Deadline::Unbounded;
        self
    }

    fn has_authorization(&self) -> bool {
        self.headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("authorization"))
    }
}

/// A successful response body, parsed by content type
#[derive(Debug, Clone, PartialEq)]
pub enum ApiBody {
    Json(Value),
    Text(String),
}

impl ApiBody {
    pub async fn from_response(response: Response) -> Result<Self, ApiError> {
        let is_json = is_json_content(response.headers());
        let bytes = response.bytes().await?;
        if is_json {
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(ApiBody::Json(Value::Null));
            }
            let value = serde_json::from_slice(&bytes)?;
            Ok(ApiBody::Json(value))
        } else {
            Ok(ApiBody::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        match self {
            ApiBody::Json(value) => Ok(serde_json::from_value(value)?),
            ApiBody::Text(text) => Ok(serde_json::from_str(&text)?),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ApiBody::Json(Value::String(s)) => s,
            ApiBody::Json(value) => value.to_string(),
            ApiBody::Text(text) => text,
        }
    }
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("json"))
        .unwrap_or(false)
}

pub(crate) fn is_absolute(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolve `path` against `base`. Absolute URLs bypass the base, and an
/// empty base leaves the path same-origin relative.
pub fn resolve_url(base: &str, path: &str) -> String {
    if is_absolute(path) {
        return path.trim().to_string();
    }
    let base = base.trim().trim_end_matches('/');
    if base.is_empty() {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

struct Inner {
    http: Client,
    config: ApiConfig,
    store: Arc<LocalStore>,
}

/// The process-wide HTTP adapter. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, store: Arc<LocalStore>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(config.timeout())
            .read_timeout(config.read_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner { http, config, store }),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.inner.store
    }

    /// Persisted override if present, otherwise the configured base
    pub fn api_base(&self) -> String {
        match self.inner.store.api_base_override() {
            Ok(Some(base)) => base,
            Ok(None) => self.inner.config.base_url.clone(),
            Err(e) => {
                warn!("Failed to read api base override: {}", e);
                self.inner.config.base_url.clone()
            }
        }
    }

    pub fn set_api_base(&self, base: &str) -> Result<(), ApiError> {
        let base = base.trim();
        if !base.is_empty() && !is_absolute(base) {
            return Err(ApiError::InvalidInput(format!(
                "api base must be an http(s) URL or empty: {}",
                base
            )));
        }
        self.inner.store.set_api_base_override(base)?;
        Ok(())
    }

    pub fn clear_api_base(&self) -> Result<(), ApiError> {
        self.inner.store.clear_api_base_override()?;
        Ok(())
    }

    pub fn resolve(&self, path: &str) -> String {
        resolve_url(&self.api_base(), path)
    }

    /// Send a request and return the status-checked response.
    ///
    /// Streaming consumers (chat, downloads) read the body themselves.
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let url = self.resolve(path);
        if !is_absolute(&url) {
            return Err(ApiError::InvalidInput(format!(
                "cannot send same-origin path {} without an API base",
                url
            )));
        }

        let mut request = self.inner.http.request(method.clone(), &url);
        match options.deadline {
            Deadline::Configured => request = request.timeout(self.inner.config.timeout()),
            Deadline::Custom(timeout) => request = request.timeout(timeout),
            Deadline::Unbounded => {}
        }

        let caller_auth = options.has_authorization();
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if options.authorize && !caller_auth {
            if let Some(token) = self.inner.store.auth_token()? {
                request = request.bearer_auth(token);
            }
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }

        request = match options.body {
            None => request,
            Some(RequestBody::Json(value)) => request.json(&value),
            Some(RequestBody::Form(pairs)) => request.form(&pairs),
            Some(RequestBody::Multipart(form)) => request.multipart(form),
            Some(RequestBody::Text {
                content,
                content_type,
            }) => request.header(CONTENT_TYPE, content_type).body(content),
        };

        debug!("{} {}", method, url);
        let response = request.send().await?;
        error_for_status(&method, &url, response).await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<ApiBody, ApiError> {
        let response = self.send_raw(method, path, options).await?;
        ApiBody::from_response(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, RequestOptions::new())
            .await?
            .into_json()
    }

    pub async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        Ok(self
            .request(Method::GET, path, RequestOptions::new())
            .await?
            .into_text())
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, RequestOptions::new().json(body)?)
            .await?
            .into_json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, RequestOptions::new().json(body)?)
            .await?
            .into_json()
    }

    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        pairs: Vec<(String, String)>,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestOptions::new().form(pairs))
            .await?
            .into_json()
    }

    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, RequestOptions::new())
            .await?
            .into_json()
    }
}

async fn error_for_status(method: &Method, url: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };

    warn!("{} {} failed ({}): {}", method, url, status.as_u16(), message);
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}
