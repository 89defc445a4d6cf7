//! Pluggable strategies that attach credentials to outgoing requests.
//!
//! The transport calls [`Authenticator::decorate`] before every attempt, so an
//! authenticator that caches short-lived tokens always gets the chance to
//! hand out a valid one. When a server answers 401 the transport asks
//! [`Authenticator::handle_unauthorized`] whether a fresh credential is
//! available and, if so, sends the request one more time.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Request;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Failures while producing credentials. Messages never contain secrets.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("credential for {0} is not a valid header value")]
    InvalidCredential(String),

    #[error("token request failed: {0}")]
    TokenRequest(#[from] reqwest::Error),

    #[error("token endpoint returned HTTP {0}")]
    TokenEndpoint(u16),

    #[error("token request timed out after {0:?}")]
    TokenTimeout(Duration),

    #[error("token source error: {0}")]
    TokenSource(String),
}

/// Attaches credentials to outgoing requests.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return `request` with credentials attached.
    async fn decorate(&self, request: Request) -> Result<Request, AuthError>;

    /// Called after a 401 with the headers the rejected request carried.
    ///
    /// Returning `true` means a new credential is ready and the request should
    /// be sent again. The transport does this at most once per call.
    async fn handle_unauthorized(&self, _rejected: &HeaderMap) -> Result<bool, AuthError> {
        Ok(false)
    }
}

fn set_header(request: &mut Request, name: HeaderName, value: &str) -> Result<(), AuthError> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| AuthError::InvalidCredential(name.to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(name, value);
    Ok(())
}

fn prefixed(prefix: &str, secret: &str) -> String {
    if prefix.is_empty() {
        secret.to_string()
    } else {
        format!("{} {}", prefix, secret)
    }
}

/// For public APIs: sends requests unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn decorate(&self, request: Request) -> Result<Request, AuthError> {
        Ok(request)
    }
}

/// Where an API key is placed.
#[derive(Debug, Clone)]
pub enum ApiKeyLocation {
    /// `<name>: <prefix> <key>`; an empty prefix sends the bare key.
    Header { name: HeaderName, prefix: String },
    /// `?<name>=<key>`.
    Query { name: String },
}

/// Sends a fixed API key in a header or query parameter.
///
/// Defaults to `Authorization: Bearer <key>`.
#[derive(Debug, Clone)]
pub struct ApiKeyAuthenticator {
    api_key: SecretString,
    location: ApiKeyLocation,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: api_key.into(),
            location: ApiKeyLocation::Header {
                name: AUTHORIZATION,
                prefix: "Bearer".to_string(),
            },
        }
    }

    /// Send the key in header `name` with `prefix` (may be empty).
    pub fn with_header(mut self, name: HeaderName, prefix: impl Into<String>) -> Self {
        self.location = ApiKeyLocation::Header {
            name,
            prefix: prefix.into(),
        };
        self
    }

    /// Send the key as query parameter `name`.
    pub fn in_query(mut self, name: impl Into<String>) -> Self {
        self.location = ApiKeyLocation::Query { name: name.into() };
        self
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn decorate(&self, mut request: Request) -> Result<Request, AuthError> {
        match &self.location {
            ApiKeyLocation::Header { name, prefix } => {
                set_header(
                    &mut request,
                    name.clone(),
                    &prefixed(prefix, self.api_key.expose_secret()),
                )?;
            }
            ApiKeyLocation::Query { name } => {
                request
                    .url_mut()
                    .query_pairs_mut()
                    .append_pair(name, self.api_key.expose_secret());
            }
        }
        Ok(request)
    }
}

/// Sends `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct BearerTokenAuthenticator {
    token: SecretString,
}

impl BearerTokenAuthenticator {
    pub fn new(token: impl Into<SecretString>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    async fn decorate(&self, mut request: Request) -> Result<Request, AuthError> {
        set_header(
            &mut request,
            AUTHORIZATION,
            &prefixed("Bearer", self.token.expose_secret()),
        )?;
        Ok(request)
    }
}

/// HTTP basic authentication.
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    encoded: SecretString,
}

impl BasicAuthenticator {
    pub fn new(username: &str, password: impl Into<SecretString>) -> Self {
        let password = password.into();
        let encoded = STANDARD.encode(format!("{}:{}", username, password.expose_secret()));
        Self {
            encoded: SecretString::new(encoded),
        }
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    async fn decorate(&self, mut request: Request) -> Result<Request, AuthError> {
        set_header(
            &mut request,
            AUTHORIZATION,
            &prefixed("Basic", self.encoded.expose_secret()),
        )?;
        Ok(request)
    }
}

/// A freshly issued access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: SecretString,
    /// Scheme used in the `Authorization` header; `Bearer` when absent.
    pub token_type: Option<String>,
    /// Lifetime from the moment the token was issued; `None` never expires.
    pub expires_in: Option<Duration>,
}

impl AccessToken {
    pub fn new(value: impl Into<SecretString>) -> Self {
        Self {
            value: value.into(),
            token_type: None,
            expires_in: None,
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }
}

/// Issues access tokens for [`OAuth2Authenticator`].
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError>;
}

#[derive(Debug)]
struct CachedToken {
    header: SecretString,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn from_token(token: AccessToken) -> Self {
        let scheme = token.token_type.as_deref().unwrap_or("Bearer");
        Self {
            header: SecretString::new(prefixed(scheme, token.value.expose_secret())),
            expires_at: token.expires_in.map(|lifetime| Instant::now() + lifetime),
        }
    }

    fn is_fresh(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() + margin < expires_at,
            None => true,
        }
    }
}

const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth2 bearer authentication with a cached, refreshable token.
///
/// The cache sits behind an async mutex held across the fetch, so at most one
/// refresh is in flight. Callers that find the token expired wait for that
/// refresh and then use its result. A fetch that outlives the fetch timeout
/// is abandoned and releases the lock.
pub struct OAuth2Authenticator {
    source: Arc<dyn TokenSource>,
    cache: Mutex<Option<CachedToken>>,
    refresh_margin: Duration,
    fetch_timeout: Duration,
}

impl OAuth2Authenticator {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
            refresh_margin: Duration::from_secs(30),
            fetch_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Refresh tokens this long before they expire.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Give up on a token fetch after `timeout`.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    async fn refresh(&self, cache: &mut Option<CachedToken>) -> Result<SecretString, AuthError> {
        debug!("Fetching new OAuth2 access token");
        let token = tokio::time::timeout(self.fetch_timeout, self.source.fetch_token())
            .await
            .map_err(|_| AuthError::TokenTimeout(self.fetch_timeout))??;
        let token = CachedToken::from_token(token);
        let header = token.header.clone();
        *cache = Some(token);
        Ok(header)
    }
}

impl std::fmt::Debug for OAuth2Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Authenticator")
            .field("refresh_margin", &self.refresh_margin)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for OAuth2Authenticator {
    async fn decorate(&self, mut request: Request) -> Result<Request, AuthError> {
        let header = {
            let mut cache = self.cache.lock().await;
            let fresh = cache
                .as_ref()
                .filter(|token| token.is_fresh(self.refresh_margin))
                .map(|token| token.header.clone());
            match fresh {
                Some(header) => header,
                None => self.refresh(&mut cache).await?,
            }
        };
        set_header(&mut request, AUTHORIZATION, header.expose_secret())?;
        Ok(request)
    }

    async fn handle_unauthorized(&self, rejected: &HeaderMap) -> Result<bool, AuthError> {
        let sent = rejected.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let mut cache = self.cache.lock().await;
        let still_current = match (cache.as_ref(), sent) {
            (Some(token), Some(sent)) => token.header.expose_secret() == sent,
            _ => true,
        };
        // Another caller may already have replaced the rejected token.
        if still_current {
            self.refresh(&mut cache).await?;
        }
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 client-credentials grant against a token endpoint.
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    scope: Option<String>,
    timeout: Duration,
}

impl ClientCredentials {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<SecretString>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Bound each token request, including reading its body.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_error(&self, error: reqwest::Error) -> AuthError {
        if error.is_timeout() {
            AuthError::TokenTimeout(self.timeout)
        } else {
            AuthError::TokenRequest(error.without_url())
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn fetch_token(&self) -> Result<AccessToken, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.token_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint(status.as_u16()));
        }

        let body: TokenResponse = response.json().await.map_err(|e| self.request_error(e))?;
        let mut token = AccessToken::new(body.access_token);
        token.token_type = body.token_type;
        token.expires_in = body.expires_in.map(Duration::from_secs);
        Ok(token)
    }
}
