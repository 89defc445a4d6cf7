//! Immutable client configuration and per-service settings.

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::retry::BackoffStrategy;

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Transport settings shared by every call a client makes.
///
/// Instances are validated at construction and never change afterwards; use
/// [`ClientConfiguration::to_builder`] to derive a modified copy.
///
/// # Example
/// ```rust
/// use sdkcore::config::ClientConfiguration;
/// use std::time::Duration;
///
/// let config = ClientConfiguration::builder()
///     .with_timeout(Duration::from_secs(10))
///     .with_max_retries(2)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.max_retries(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfiguration {
    timeout: Duration,
    connect_timeout: Option<Duration>,
    max_retries: u32,
    retry_delay: Duration,
    max_retry_delay: Duration,
    backoff: BackoffStrategy,
    retry_jitter: bool,
    retry_non_idempotent: bool,
    user_agent: Option<String>,
    custom_headers: HashMap<String, String>,
    debug_requests: bool,
    verify_ssl: bool,
}

impl ClientConfiguration {
    pub fn builder() -> ClientConfigurationBuilder {
        ClientConfigurationBuilder::default()
    }

    /// Start a builder pre-filled with this configuration's values.
    pub fn to_builder(&self) -> ClientConfigurationBuilder {
        ClientConfigurationBuilder {
            config: self.clone(),
        }
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Base delay between retries.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    pub fn backoff(&self) -> BackoffStrategy {
        self.backoff
    }

    pub fn retry_jitter(&self) -> bool {
        self.retry_jitter
    }

    /// Retry POST/PUT/PATCH/DELETE after failures where the request may have
    /// reached the server.
    pub fn retry_non_idempotent(&self) -> bool {
        self.retry_non_idempotent
    }

    pub fn custom_headers(&self) -> &HashMap<String, String> {
        &self.custom_headers
    }

    pub fn debug_requests(&self) -> bool {
        self.debug_requests
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    /// User agent sent with every request for `service_name`.
    pub fn user_agent(&self, service_name: &str) -> String {
        match &self.user_agent {
            Some(agent) => agent.clone(),
            None => format!(
                "{}-{}/{}",
                env!("CARGO_PKG_NAME"),
                service_name.to_lowercase(),
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.timeout.is_zero() {
            return Err(ConfigurationError::InvalidTimeout);
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigurationError::InvalidTimeout);
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigurationError::InvalidRetries {
                value: self.max_retries,
                max: MAX_RETRIES_LIMIT,
            });
        }
        if self.retry_delay.is_zero() {
            return Err(ConfigurationError::InvalidRetryDelay(
                "retry delay must be greater than zero".to_string(),
            ));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ConfigurationError::InvalidRetryDelay(format!(
                "max retry delay {:?} is shorter than base delay {:?}",
                self.max_retry_delay, self.retry_delay
            )));
        }
        if let BackoffStrategy::Exponential { multiplier } = self.backoff {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(ConfigurationError::InvalidRetryDelay(format!(
                    "backoff multiplier must be at least 1.0, got {}",
                    multiplier
                )));
            }
        }
        for (name, value) in &self.custom_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
                return Err(ConfigurationError::InvalidHeader { name: name.clone() });
            }
        }
        if let Some(agent) = &self.user_agent {
            if HeaderValue::from_str(agent).is_err() {
                return Err(ConfigurationError::InvalidHeader {
                    name: "User-Agent".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            backoff: BackoffStrategy::default(),
            retry_jitter: true,
            retry_non_idempotent: false,
            user_agent: None,
            custom_headers: HashMap::new(),
            debug_requests: false,
            verify_ssl: true,
        }
    }
}

/// Builder for [`ClientConfiguration`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct ClientConfigurationBuilder {
    config: ClientConfiguration,
}

impl ClientConfigurationBuilder {
    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the base delay between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Cap applied to every computed backoff delay.
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.max_retry_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn with_retry_jitter(mut self, jitter: bool) -> Self {
        self.config.retry_jitter = jitter;
        self
    }

    pub fn with_retry_non_idempotent(mut self, enabled: bool) -> Self {
        self.config.retry_non_idempotent = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_debug_requests(mut self, enabled: bool) -> Self {
        self.config.debug_requests = enabled;
        self
    }

    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.config.verify_ssl = verify;
        self
    }

    pub fn build(self) -> Result<ClientConfiguration, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings describing where a service lives.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    base_url: Url,
    custom_endpoints: HashMap<String, String>,
    service_config: Map<String, Value>,
    api_version: Option<String>,
    rate_limit_per_second: Option<f64>,
}

impl ServiceSettings {
    /// Create settings for a service rooted at `base_url`.
    ///
    /// The URL must be absolute and use `http` or `https`.
    pub fn new(base_url: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };

        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", parsed.scheme())));
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self {
            base_url: parsed,
            custom_endpoints: HashMap::new(),
            service_config: Map::new(),
            api_version: None,
            rate_limit_per_second: None,
        })
    }

    /// Override the path used for a named endpoint.
    pub fn with_endpoint(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.custom_endpoints.insert(name.into(), path.into());
        self
    }

    /// Attach a free-form, service-specific setting.
    pub fn with_service_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.service_config.insert(key.into(), value);
        self
    }

    /// Record the API version the SDK targets.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Record the service's advertised request rate.
    ///
    /// Informational only: the transport does not throttle.
    pub fn with_rate_limit_per_second(mut self, rate: f64) -> Result<Self, ConfigurationError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigurationError::InvalidRateLimit(rate));
        }
        self.rate_limit_per_second = Some(rate);
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn rate_limit_per_second(&self) -> Option<f64> {
        self.rate_limit_per_second
    }

    /// Path for endpoint `name`, falling back to `default` when not overridden.
    pub fn endpoint<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.custom_endpoints
            .get(name)
            .map(String::as_str)
            .unwrap_or(default)
    }

    pub fn service_config(&self, key: &str) -> Option<&Value> {
        self.service_config.get(key)
    }
}
