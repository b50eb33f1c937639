use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use progress_core::helpers::DEFAULT_REQUEST_TIMEOUT;
use progress_core::model::{
    LessonId, LessonProgressPayload, ModuleId, RawLessonProgress, RawProgressSnapshot,
    ResumePoint,
};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::auth::{AuthTokenProvider, NoAuth, StaticToken};
use crate::backend::{BackendError, ProgressBackend};

/// Errors raised while building the HTTP backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HttpConfigError {
    #[error("invalid progress API url {raw}: {reason}")]
    InvalidUrl { raw: String, reason: String },
    #[error("invalid timeout value: {raw}")]
    InvalidTimeout { raw: String },
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct HttpBackendConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub api_token: Option<String>,
}

impl HttpBackendConfig {
    /// # Errors
    ///
    /// Returns `HttpConfigError::InvalidUrl` if `base_url` cannot be parsed
    /// or cannot carry path segments.
    pub fn new(base_url: &str) -> Result<Self, HttpConfigError> {
        let parsed = Url::parse(base_url.trim()).map_err(|e| HttpConfigError::InvalidUrl {
            raw: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(HttpConfigError::InvalidUrl {
                raw: base_url.to_string(),
                reason: "url cannot be a base".into(),
            });
        }
        Ok(Self {
            base_url: parsed,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            api_token: None,
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Read `LEARN_PROGRESS_API_URL`, `LEARN_PROGRESS_API_TOKEN` and
    /// `LEARN_PROGRESS_TIMEOUT_SECS`. Returns `Ok(None)` when no URL is set.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError` if a variable is set but malformed.
    pub fn from_env() -> Result<Option<Self>, HttpConfigError> {
        let Some(url) = env::var("LEARN_PROGRESS_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        else {
            return Ok(None);
        };
        let mut config = Self::new(&url)?;
        if let Ok(raw) = env::var("LEARN_PROGRESS_TIMEOUT_SECS") {
            config.timeout = parse_timeout_secs(&raw)?;
        }
        if let Ok(token) = env::var("LEARN_PROGRESS_API_TOKEN") {
            if !token.trim().is_empty() {
                config.api_token = Some(token);
            }
        }
        Ok(Some(config))
    }
}

/// Parse a whole number of seconds greater than zero.
///
/// # Errors
///
/// Returns `HttpConfigError::InvalidTimeout` for anything else.
pub fn parse_timeout_secs(raw: &str) -> Result<Duration, HttpConfigError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| HttpConfigError::InvalidTimeout {
            raw: raw.to_string(),
        })
}

/// REST client for the progress API.
///
/// Endpoints, relative to the base url:
/// - `GET  api/progress` snapshot
/// - `GET  api/progress/lessons/{lessonId}`
/// - `PUT  api/progress/lessons/{lessonId}`
/// - `GET  api/progress/modules/{moduleId}/resume`
#[derive(Clone)]
pub struct HttpProgressBackend {
    client: Client,
    config: HttpBackendConfig,
    auth: Arc<dyn AuthTokenProvider>,
}

impl HttpProgressBackend {
    /// Build a client; the auth provider comes from the config's token.
    ///
    /// # Errors
    ///
    /// Returns `HttpConfigError::Client` if the HTTP client cannot be built.
    pub fn new(config: HttpBackendConfig) -> Result<Self, HttpConfigError> {
        let auth: Arc<dyn AuthTokenProvider> = match &config.api_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(NoAuth),
        };
        Self::with_auth(config, auth)
    }

    /// # Errors
    ///
    /// Returns `HttpConfigError::Client` if the HTTP client cannot be built.
    pub fn with_auth(
        config: HttpBackendConfig,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> Result<Self, HttpConfigError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        endpoint(&self.config.base_url, segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn exchange(&self, request: RequestBuilder) -> Result<Reply, BackendError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() {
            debug!(status = status.as_u16(), "progress API returned an error status");
        }
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let reply = self.exchange(request).await?;
        if !reply.status.is_success() {
            return Err(error_from_reply(reply.status, &reply.headers, &reply.body));
        }
        decode_body(&reply.body)
    }
}

#[async_trait]
impl ProgressBackend for HttpProgressBackend {
    async fn fetch_snapshot(&self) -> Result<RawProgressSnapshot, BackendError> {
        let url = self.endpoint(&["api", "progress"])?;
        self.send(self.client.get(url)).await
    }

    async fn put_lesson_progress(
        &self,
        lesson_id: &LessonId,
        payload: &LessonProgressPayload,
    ) -> Result<RawLessonProgress, BackendError> {
        let url = self.endpoint(&["api", "progress", "lessons", lesson_id.as_str()])?;
        self.send(self.client.put(url).json(payload)).await
    }

    async fn fetch_lesson_progress(
        &self,
        lesson_id: &LessonId,
    ) -> Result<RawLessonProgress, BackendError> {
        let url = self.endpoint(&["api", "progress", "lessons", lesson_id.as_str()])?;
        self.send(self.client.get(url)).await
    }

    async fn get_module_resume_point(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ResumePoint>, BackendError> {
        let url = self.endpoint(&["api", "progress", "modules", module_id.as_str(), "resume"])?;
        let reply = self.exchange(self.client.get(url)).await?;
        resume_point_from_reply(reply.status, &reply.headers, &reply.body)
    }
}

/// A response with its body already read.
struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    #[serde(default, alias = "retry_after")]
    retry_after: Option<f64>,
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| BackendError::Network(format!("base url cannot be extended: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-success status to the error class callers recover from.
#[must_use]
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout,
        s if s.is_server_error() => BackendError::Server { status: s.as_u16() },
        s => BackendError::Rejected { status: s.as_u16() },
    }
}

/// `Retry-After` in its delay-seconds form. HTTP-date values are ignored.
fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(seconds_to_duration)
}

/// `retryAfter` from a JSON error body.
fn retry_after_body(body: &[u8]) -> Option<Duration> {
    serde_json::from_slice::<RateLimitBody>(body)
        .ok()?
        .retry_after
        .and_then(seconds_to_duration)
}

/// Negative, non-finite and out-of-range delays read as absent.
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Error for a non-success reply. A 429 takes its delay from the
/// `Retry-After` header, then from a `retryAfter` body field.
fn error_from_reply(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> BackendError {
    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        retry_after_header(headers).or_else(|| retry_after_body(body))
    } else {
        None
    };
    classify_status(status, retry_after)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(body).map_err(|e| BackendError::Decode(e.to_string()))
}

/// 204, 404 and an empty body all mean the module has no resume point.
fn resume_point_from_reply(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Option<ResumePoint>, BackendError> {
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(error_from_reply(status, headers, body));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    decode_body(body)
}
