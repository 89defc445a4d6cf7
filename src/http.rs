//! HTTP transport shared by every resource of a client.
//!
//! [`Transport`] builds requests against the service base URL, lets the
//! authenticator decorate each attempt, retries transient failures according
//! to the [`RetryPolicy`], and turns terminal failures into [`ServiceError`]s.

use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Request, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::auth::{AuthError, Authenticator};
use crate::config::ClientConfiguration;
use crate::error::{ConfigurationError, ErrorKind, ServiceError, ValidationError};
use crate::envelope::ErrorResponse;
use crate::retry::{is_retryable_status, parse_retry_after, FailurePoint, RetryPolicy, Sleeper, TokioSleeper};

const JSON: &str = "application/json";
const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "request-id"];

/// Build the pooled HTTP client for a service.
///
/// This applies the configured timeouts, user agent and TLS verification.
pub fn build_http_client(config: &ClientConfiguration, service_name: &str) -> Result<Client, ConfigurationError> {
    let mut builder = Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent(service_name));

    if let Some(connect_timeout) = config.connect_timeout() {
        builder = builder.connect_timeout(connect_timeout);
    }

    if !config.verify_ssl() {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| ConfigurationError::HttpClient(e.to_string()))
}

/// Per-call request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub json: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Allow retrying a non-idempotent call after it may have reached the server.
    pub retry_non_idempotent: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Add query parameters, skipping `None` values.
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: Into<String>,
        V: ToString,
    {
        for (key, value) in params {
            if let Some(value) = value {
                self.params.push((key.into(), value.to_string()));
            }
        }
        self
    }

    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_retry_non_idempotent(mut self, enabled: bool) -> Self {
        self.retry_non_idempotent = enabled;
        self
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The final URL without its query string, which may hold credentials.
    pub url: Url,
    pub request_id: Option<String>,
}

impl HttpResponse {
    async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let mut url = response.url().clone();
        url.set_query(None);
        url.set_fragment(None);
        let body = response.bytes().await?;
        let request_id = REQUEST_ID_HEADERS
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            status,
            headers,
            body,
            url,
            request_id,
        })
    }

    /// Deserialize the body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Parse the body as untyped JSON; an empty body is `null`.
    pub fn json_value(&self) -> Result<Value, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        self.json()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }
}

/// Why an attempt did not produce a successful response.
enum Failure {
    Network(reqwest::Error),
    Status(HttpResponse),
}

impl Failure {
    fn point(&self) -> FailurePoint {
        match self {
            Failure::Network(e) if e.is_connect() => FailurePoint::BeforeSend,
            _ => FailurePoint::AfterSend,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Failure::Network(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Failure::Status(response) => is_retryable_status(response.status),
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Failure::Status(response)
                if matches!(response.status, StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE) =>
            {
                parse_retry_after(&response.headers)
            }
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Failure::Network(e) if e.is_timeout() => "timeout".to_string(),
            Failure::Network(e) if e.is_connect() => "connection failed".to_string(),
            Failure::Network(_) => "network error".to_string(),
            Failure::Status(response) => format!("HTTP {}", response.status.as_u16()),
        }
    }
}

/// Executes HTTP verbs against one service.
///
/// Owns the connection pool, which is opened lazily on the first request and
/// released when the last handle to the transport is dropped. Safe to share
/// across tasks through `Arc`.
pub struct Transport {
    client: Client,
    service_name: String,
    base_url: Url,
    config: Arc<ClientConfiguration>,
    authenticator: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("service_name", &self.service_name)
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        service_name: impl Into<String>,
        base_url: Url,
        config: Arc<ClientConfiguration>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ConfigurationError> {
        let service_name = service_name.into();
        let client = build_http_client(&config, &service_name)?;
        Ok(Self {
            client,
            retry: RetryPolicy::from_config(&config),
            service_name,
            base_url,
            config,
            authenticator,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace how the transport waits between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    /// Resolve `path` against the base URL.
    ///
    /// A leading slash is optional; an absolute `http(s)://` path is used as is.
    pub fn build_url(&self, path: &str) -> Result<Url, ServiceError> {
        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };

        Url::parse(&joined).map_err(|e| {
            ServiceError::configuration(
                &self.service_name,
                ConfigurationError::InvalidBaseUrl {
                    url: joined.clone(),
                    reason: e.to_string(),
                },
            )
        })
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<HttpResponse, ServiceError> {
        let options = params
            .iter()
            .fold(RequestOptions::new(), |options, (key, value)| options.with_param(*key, value));
        self.execute(Method::GET, path, options).await
    }

    pub async fn post(&self, path: &str, json: Value) -> Result<HttpResponse, ServiceError> {
        self.execute(Method::POST, path, RequestOptions::new().with_json(json)).await
    }

    pub async fn put(&self, path: &str, json: Value) -> Result<HttpResponse, ServiceError> {
        self.execute(Method::PUT, path, RequestOptions::new().with_json(json)).await
    }

    pub async fn patch(&self, path: &str, json: Value) -> Result<HttpResponse, ServiceError> {
        self.execute(Method::PATCH, path, RequestOptions::new().with_json(json)).await
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse, ServiceError> {
        self.execute(Method::DELETE, path, RequestOptions::new()).await
    }

    /// Send a request, retrying transient failures.
    ///
    /// Returns the response for any 2xx status. Every other outcome becomes a
    /// [`ServiceError`] once retries are exhausted or the failure is not
    /// retryable.
    #[tracing::instrument(skip(self, options), fields(service = %self.service_name))]
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, ServiceError> {
        let url = self.build_url(path)?;
        let body = options
            .json
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ServiceError::validation(&self.service_name, ValidationError::single("body", e.to_string())))?
            .map(Bytes::from);
        let retry_non_idempotent = options.retry_non_idempotent || self.config.retry_non_idempotent();

        let mut attempt: u32 = 1;
        let mut resent_after_refresh = false;

        loop {
            let request = self.prepare(&method, &url, &options, body.as_ref()).await?;
            let sent_headers = request.headers().clone();
            let started = Instant::now();

            if self.config.debug_requests() {
                debug!(%method, path = url.path(), attempt, "Sending request");
            }

            let failure = match self.client.execute(request).await {
                Ok(response) => {
                    if response.status() == StatusCode::UNAUTHORIZED && !resent_after_refresh {
                        resent_after_refresh = true;
                        let refreshed = self
                            .bounded_auth(self.authenticator.handle_unauthorized(&sent_headers))
                            .await
                            .map_err(|e| e.with_status(401))?;
                        if refreshed {
                            debug!("Credentials refreshed after 401, resending");
                            continue;
                        }
                    }

                    match HttpResponse::read(response).await {
                        Ok(response) => {
                            if self.config.debug_requests() {
                                debug!(
                                    status = response.status.as_u16(),
                                    elapsed_ms = started.elapsed().as_millis() as u64,
                                    bytes = response.body.len(),
                                    "Received response"
                                );
                            }
                            if response.is_success() {
                                return Ok(response);
                            }
                            Failure::Status(response)
                        }
                        Err(e) => Failure::Network(e),
                    }
                }
                Err(e) => Failure::Network(e),
            };

            let can_retry = failure.is_retryable()
                && self.retry.allows(&method, failure.point(), retry_non_idempotent)
                && self.retry.has_attempts_left(attempt);

            if !can_retry {
                debug!(attempt, "{} {}: giving up ({})", method, url.path(), failure.describe());
                return Err(self.into_error(failure, &url));
            }

            let delay = self.retry.delay_for(attempt - 1, failure.retry_after());
            warn!(
                "{} {}: attempt {}/{} failed ({}), retrying in {:?}",
                method,
                url.path(),
                attempt,
                self.retry.max_attempts(),
                failure.describe(),
                delay
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Build one attempt's request and let the authenticator decorate it.
    async fn prepare(
        &self,
        method: &Method,
        url: &Url,
        options: &RequestOptions,
        body: Option<&Bytes>,
    ) -> Result<Request, ServiceError> {
        let mut builder = self
            .client
            .request(method.clone(), url.clone())
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON);

        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        for (key, value) in self.config.custom_headers() {
            builder = builder.header(key, value);
        }
        for (key, value) in &options.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = body {
            builder = builder.body(body.clone());
        }

        let request = builder.build().map_err(|e| {
            ServiceError::configuration(
                &self.service_name,
                ConfigurationError::InvalidHeader {
                    name: e.without_url().to_string(),
                },
            )
        })?;

        self.bounded_auth(self.authenticator.decorate(request)).await
    }

    /// Run an authenticator step within the request timeout.
    async fn bounded_auth<T>(&self, step: impl Future<Output = Result<T, AuthError>>) -> Result<T, ServiceError> {
        match tokio::time::timeout(self.config.timeout(), step).await {
            Ok(result) => result.map_err(|e| self.auth_error(e)),
            Err(elapsed) => Err(ServiceError::timeout(
                &self.service_name,
                format!("authentication did not complete within {:?}", self.config.timeout()),
            )
            .with_cause(elapsed)),
        }
    }

    fn auth_error(&self, error: AuthError) -> ServiceError {
        let kind = match error {
            AuthError::TokenTimeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::Authentication,
        };
        ServiceError::new(
            &self.service_name,
            kind,
            format!("failed to authenticate request: {}", error),
        )
        .with_cause(error)
    }

    fn into_error(&self, failure: Failure, url: &Url) -> ServiceError {
        match failure {
            Failure::Network(e) if e.is_timeout() => ServiceError::timeout(
                &self.service_name,
                format!("request to {} timed out after {:?}", url.path(), self.config.timeout()),
            )
            .with_cause(e.without_url()),
            Failure::Network(e) => ServiceError::connection(
                &self.service_name,
                format!("request to {} failed: connection error", url.path()),
            )
            .with_cause(e.without_url()),
            Failure::Status(response) => self.status_error(&response),
        }
    }

    /// Map an error response to a [`ServiceError`], reading whatever parts of
    /// a JSON error body are present.
    fn status_error(&self, response: &HttpResponse) -> ServiceError {
        let status = response.status;
        let envelope = response
            .json::<Value>()
            .ok()
            .and_then(|body| ErrorResponse::from_body(&body));
        let retry_after = parse_retry_after(&response.headers);

        let kind = match status {
            StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited { retry_after },
            StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Unavailable { retry_after },
            _ => ErrorKind::Api,
        };

        let message = envelope
            .as_ref()
            .and_then(ErrorResponse::message)
            .map(str::to_string)
            .unwrap_or_else(|| match status.canonical_reason() {
                Some(reason) => reason.to_string(),
                None => format!("HTTP {}", status.as_u16()),
            });

        let mut error = ServiceError::new(&self.service_name, kind, message).with_status(status.as_u16());
        if let Some(code) = envelope.as_ref().and_then(|e| e.error_code.clone()) {
            error = error.with_error_code(code);
        }
        if let Some(request_id) = response
            .request_id
            .clone()
            .or_else(|| envelope.and_then(|e| e.request_id))
        {
            error = error.with_request_id(request_id);
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;
    use std::time::Duration;

    fn transport(base: &str) -> Transport {
        let config = ClientConfiguration::builder()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(0)
            .build()
            .unwrap();
        Transport::new("TestService", base.parse().unwrap(), Arc::new(config), Arc::new(NoAuth)).unwrap()
    }

    #[test]
    fn test_build_http_client() {
        let config = ClientConfiguration::builder()
            .with_timeout(Duration::from_secs(30))
            .with_connect_timeout(Duration::from_secs(5))
            .with_verify_ssl(false)
            .build()
            .unwrap();

        assert!(build_http_client(&config, "TestService").is_ok());
    }

    #[test]
    fn test_build_url() {
        let transport = transport("https://api.example.com");
        assert_eq!(transport.build_url("/users").unwrap().as_str(), "https://api.example.com/users");
        assert_eq!(transport.build_url("users").unwrap().as_str(), "https://api.example.com/users");
        assert_eq!(
            transport.build_url("https://other.api.com/users").unwrap().as_str(),
            "https://other.api.com/users"
        );
    }

    #[test]
    fn test_build_url_keeps_base_path() {
        let t = transport("https://api.test/x");
        assert_eq!(t.build_url("/users/123").unwrap().as_str(), "https://api.test/x/users/123");

        let t = transport("https://api.test/x/");
        assert_eq!(t.build_url("users").unwrap().as_str(), "https://api.test/x/users");
    }

    #[test]
    fn test_request_options_skip_missing_params() {
        let options = RequestOptions::new().with_params([("page", Some(1)), ("limit", Some(10)), ("search", None)]);
        assert_eq!(
            options.params,
            vec![("page".to_string(), "1".to_string()), ("limit".to_string(), "10".to_string())]
        );
    }

    #[test]
    fn test_http_response_helpers() {
        let response = HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"key": "value", "number": 42}"#),
            url: "https://api.example.com/test".parse().unwrap(),
            request_id: None,
        };

        let value = response.json_value().unwrap();
        assert_eq!(value["number"], 42);
        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
    }

    #[test]
    fn test_invalid_json_body() {
        let response = HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"invalid json"),
            url: "https://api.example.com/test".parse().unwrap(),
            request_id: None,
        };
        assert!(response.json_value().is_err());
        assert_eq!(response.text(), "invalid json");
    }

    #[test]
    fn test_empty_body_is_null() {
        let response = HttpResponse {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: "https://api.example.com/test".parse().unwrap(),
            request_id: None,
        };
        assert_eq!(response.json_value().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_sends_default_and_custom_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .match_header("accept", JSON)
            .match_header("content-type", JSON)
            .match_header("x-custom", "value")
            .match_header("x-trace", "abc")
            .match_header("user-agent", mockito::Matcher::Regex("^sdkcore-testservice/".into()))
            .with_status(200)
            .with_header("x-request-id", "req_123")
            .with_body(r#"{"users": []}"#)
            .create_async()
            .await;

        let config = ClientConfiguration::builder()
            .with_header("X-Custom", "value")
            .with_max_retries(0)
            .build()
            .unwrap();
        let transport = Transport::new(
            "TestService",
            server.url().parse().unwrap(),
            Arc::new(config),
            Arc::new(NoAuth),
        )
        .unwrap();

        let options = RequestOptions::new().with_param("page", 2).with_header("X-Trace", "abc");
        let response = transport.execute(Method::GET, "/users", options).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.request_id.as_deref(), Some("req_123"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_envelope_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/users/999")
            .with_status(404)
            .with_header("content-type", JSON)
            .with_body(r#"{"error": "User not found", "error_code": "NOT_FOUND", "request_id": "req_9"}"#)
            .create_async()
            .await;

        let transport = transport(&server.url());
        let err = transport.get("/users/999", &[]).await.unwrap_err();

        assert_eq!(err.status_code, Some(404));
        assert_eq!(err.kind, ErrorKind::Api);
        assert_eq!(err.error_code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(err.request_id.as_deref(), Some("req_9"));
        assert!(err.to_string().contains("User not found"));
        assert!(err.to_string().contains("[TestService]"));
    }

    #[tokio::test]
    async fn test_non_json_error_uses_reason_phrase() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("DELETE", "/users/1")
            .with_status(403)
            .with_body("nope")
            .create_async()
            .await;

        let err = transport(&server.url()).delete("/users/1").await.unwrap_err();
        assert_eq!(err.status_code, Some(403));
        assert_eq!(err.message, "Forbidden");
    }

    #[tokio::test]
    async fn test_rate_limit_and_unavailable_kinds() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header("retry-after", "60")
            .with_body(r#"{"error": "Rate limit exceeded"}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/down")
            .with_status(503)
            .with_header("retry-after", "30")
            .create_async()
            .await;

        let transport = transport(&server.url());

        let err = transport.get("/limited", &[]).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.status_code, Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));

        let err = transport.get("/down", &[]).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_validation_detail_list_is_read() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/users/abc")
            .with_status(422)
            .with_body(
                r#"{"detail": [{"loc": ["path", "id"], "msg": "bad id", "type": "value_error"}],
                    "error_code": "VALIDATION", "request_id": "req_1"}"#,
            )
            .create_async()
            .await;

        let err = transport(&server.url()).get("/users/abc", &[]).await.unwrap_err();

        assert_eq!(err.status_code, Some(422));
        assert_eq!(err.message, "bad id");
        assert_eq!(err.error_code.as_deref(), Some("VALIDATION"));
        assert_eq!(err.request_id.as_deref(), Some("req_1"));
    }

    #[tokio::test]
    async fn test_numeric_request_id_keeps_message_and_code() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/users")
            .with_status(400)
            .with_body(r#"{"error": "bad request body", "error_code": "BAD", "request_id": 12345}"#)
            .create_async()
            .await;

        let err = transport(&server.url()).post("/users", serde_json::json!({})).await.unwrap_err();

        assert_eq!(err.message, "bad request body");
        assert_eq!(err.error_code.as_deref(), Some("BAD"));
        assert_eq!(err.request_id.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_query_api_key_not_kept_in_response_url() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/status")
            .match_query(mockito::Matcher::UrlEncoded("api_key".into(), "sk-live-123".into()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let config = ClientConfiguration::builder().with_max_retries(0).build().unwrap();
        let auth = crate::auth::ApiKeyAuthenticator::new("sk-live-123").in_query("api_key");
        let transport =
            Transport::new("TestService", server.url().parse().unwrap(), Arc::new(config), Arc::new(auth)).unwrap();

        let response = transport.get("/status", &[]).await.unwrap();

        assert_eq!(response.url.path(), "/status");
        assert_eq!(response.url.query(), None);
        assert!(!format!("{:?}", response).contains("sk-live-123"));
    }

    struct FailingRefresh;

    #[async_trait::async_trait]
    impl Authenticator for FailingRefresh {
        async fn decorate(&self, request: Request) -> Result<Request, AuthError> {
            Ok(request)
        }

        async fn handle_unauthorized(&self, _rejected: &HeaderMap) -> Result<bool, AuthError> {
            Err(AuthError::TokenEndpoint(500))
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_after_401_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/users/1")
            .with_status(401)
            .create_async()
            .await;

        let config = ClientConfiguration::builder().with_max_retries(0).build().unwrap();
        let transport = Transport::new(
            "TestService",
            server.url().parse().unwrap(),
            Arc::new(config),
            Arc::new(FailingRefresh),
        )
        .unwrap();

        let err = transport.get("/users/1", &[]).await.unwrap_err();

        assert!(err.is_authentication());
        assert!(err.is_http());
        assert_eq!(err.status_code, Some(401));
        assert!(err.cause().is_some());
    }

    struct HangingAuth;

    #[async_trait::async_trait]
    impl Authenticator for HangingAuth {
        async fn decorate(&self, _request: Request) -> Result<Request, AuthError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_authenticator_is_bounded_by_timeout() {
        let config = ClientConfiguration::builder()
            .with_timeout(Duration::from_millis(100))
            .with_max_retries(0)
            .build()
            .unwrap();
        let transport = Transport::new(
            "TestService",
            "http://127.0.0.1:9".parse().unwrap(),
            Arc::new(config),
            Arc::new(HangingAuth),
        )
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), transport.get("/users", &[]))
            .await
            .expect("authentication must not hang the call")
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.status_code, None);
    }
}
