//! Shared HTTP plumbing for every resource client
//!
//! ApiClient owns the reqwest client, the base URL of the study API and the
//! bearer token source. Each request carries `Authorization: Bearer <token>`,
//! `Content-Type: application/json` and the current trace context.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use studyboard_api::{ClientError, Result};

/// Source of the bearer token sent with every request
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A token obtained up front (CLI flag, environment, test)
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(..)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        if self.0.trim().is_empty() {
            return Err(ClientError::Authentication {
                kind: studyboard_api::AuthErrorKind::LoginRequired,
                message: "Login required: no access token".to_string(),
            });
        }
        Ok(self.0.clone())
    }
}

/// Carrier for injecting the current trace context into request headers
struct HeaderInjector<'a> {
    headers: &'a mut HeaderMap,
}

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(value) = HeaderValue::from_str(&value) {
                self.headers.insert(name, value);
            }
        }
    }
}

fn inject_trace_context(headers: &mut HeaderMap) {
    use opentelemetry::global;
    use opentelemetry::Context;

    let mut injector = HeaderInjector { headers };
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut injector);
    });
}

pub struct ApiClientBuilder {
    base_url: String,
    tokens: Option<Arc<dyn TokenProvider>>,
    timeout: Option<Duration>,
}

impl ApiClientBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.tokens = Some(Arc::new(StaticToken::new(token)));
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let tokens = self.tokens.ok_or_else(|| ClientError::Config {
            message: "no token provider configured".to_string(),
        })?;
        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Config {
                message: "API base URL is empty".to_string(),
            });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ClientError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })?;

        Ok(ApiClient {
            inner: Arc::new(Inner {
                client,
                base_url,
                tokens,
            }),
        })
    }
}

struct Inner {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

/// Cheap to clone; clones share the connection pool
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            tokens: None,
            timeout: None,
        }
    }

    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::builder(base_url).token(token).build()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Absolute URL for an API path such as `studies/S1/steps`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        let token = self.inner.tokens.token().await?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ClientError::Config {
                message: "access token contains characters not allowed in a header".to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.send::<(), T>(Method::GET, path, query, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.send(Method::PATCH, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send::<(), ()>(Method::DELETE, path, &[], None).await
    }

    async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("[ApiClient] {} {}", method, url);

        let mut request = self
            .inner
            .client
            .request(method.clone(), &url)
            .headers(self.headers().await?);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            let message = format_reqwest_error(&e, &url, &method);
            error!("[ApiClient] {}", message);
            ClientError::transport(message)
        })?;

        let text = handle_response(response, &url, path).await?;
        // 204 and other empty bodies decode as JSON null, so `()` works
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(text).map_err(|e| {
            error!(
                "[ApiClient] Failed to decode response from {}: {} - body: {}",
                url,
                e,
                truncate(text, 200)
            );
            ClientError::decode(format!("{} {}: {}", method, path, e))
        })
    }
}

/// Describes a transport failure in terms of what probably went wrong
fn format_reqwest_error(e: &reqwest::Error, url: &str, method: &Method) -> String {
    if e.is_timeout() {
        format!(
            "{} {} failed: timeout - request took too long (check network or increase the timeout)",
            method, url
        )
    } else if e.is_connect() {
        format!(
            "{} {} failed: connection error - check network connectivity and the API URL. Error: {}",
            method, url, e
        )
    } else if e.is_request() {
        format!(
            "{} {} failed: request error - invalid URL or malformed request. Error: {}",
            method, url, e
        )
    } else if e.is_body() || e.is_decode() {
        format!(
            "{} {} failed: could not read the response body. Error: {}",
            method, url, e
        )
    } else {
        format!("{} {} failed: {}. Debug details: {:?}", method, url, e, e)
    }
}

/// Returns the body of a 2xx response, or the classified error
async fn handle_response(response: reqwest::Response, url: &str, path: &str) -> Result<String> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        ClientError::transport(format!("Failed to read response body from {}: {}", url, e))
    })?;

    if !status.is_success() {
        error!(
            "[ApiClient] HTTP {} from {}: {}",
            status.as_u16(),
            url,
            truncate(&body, 500)
        );
        return Err(ClientError::from_response(status.as_u16(), path, &body));
    }
    Ok(body)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}... (truncated)", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
