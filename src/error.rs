//! Error taxonomy shared by the transport, resources and concrete SDKs.
//!
//! Every failure surfaced by the core is a [`ServiceError`]. Its [`ErrorKind`]
//! says what class of failure it is; service-specific refinements (a
//! "duplicate email" on a users API, for example) are expressed with
//! [`ErrorKind::Domain`], which still answers the capability queries of the
//! kind it refines. Callers can match on the kind they care about or treat
//! every `ServiceError` as the general API error.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use itertools::Itertools;
use nonempty::NonEmpty;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Field path used for violations that concern the whole value.
pub const ROOT_FIELD: &str = "$";

/// Errors raised while constructing configuration or settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("max_retries must be between 0 and {max}, got {value}")]
    InvalidRetries { value: u32, max: u32 },

    #[error("invalid retry delay: {0}")]
    InvalidRetryDelay(String),

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("rate limit must be a positive number of requests per second, got {0}")]
    InvalidRateLimit(f64),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path of the offending field (`email`, `[2].name`).
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefix the field path, used when validating nested values or list elements.
    pub fn nested_in(mut self, prefix: &str) -> Self {
        self.field = if self.field == ROOT_FIELD {
            prefix.to_string()
        } else if self.field.starts_with('[') {
            format!("{}{}", prefix, self.field)
        } else {
            format!("{}.{}", prefix, self.field)
        };
        self
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Payload shape mismatch. Lists every violating field, never just the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validation failed: {}", .violations.iter().join("; "))]
pub struct ValidationError {
    pub violations: NonEmpty<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: NonEmpty::new(FieldViolation::new(field, message)),
        }
    }

    /// Build from a list of violations, `None` when the list is empty.
    pub fn from_violations(violations: Vec<FieldViolation>) -> Option<Self> {
        NonEmpty::from_vec(violations).map(|violations| Self { violations })
    }

    /// Names of the violating fields, in the order they were found.
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

/// Class of a [`ServiceError`].
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Construction-time misconfiguration.
    Configuration,
    /// The server could not be reached or the connection broke.
    Connection,
    /// An attempt exceeded the configured timeout.
    Timeout,
    /// The payload did not match the expected model.
    Validation(ValidationError),
    /// Any HTTP-level error without a more specific kind.
    Api,
    /// HTTP 401.
    Authentication,
    /// HTTP 429.
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 503.
    Unavailable { retry_after: Option<Duration> },
    /// A resource lookup returned nothing.
    NotFound {
        resource_kind: String,
        resource_id: String,
    },
    /// Service-specific refinement of another kind.
    Domain {
        name: &'static str,
        refines: Box<ErrorKind>,
    },
}

impl ErrorKind {
    /// The built-in kind at the bottom of a chain of domain refinements.
    pub fn base(&self) -> &ErrorKind {
        match self {
            ErrorKind::Domain { refines, .. } => refines.base(),
            other => other,
        }
    }

    /// Whether `self` is `name` or refines a domain kind named `name`.
    fn has_domain(&self, wanted: &str) -> bool {
        match self {
            ErrorKind::Domain { name, refines } => *name == wanted || refines.has_domain(wanted),
            _ => false,
        }
    }
}

/// Structured error carrying enough context to log and branch on.
#[derive(Error, Debug)]
#[error("[{}] {}{}", .service_name, .message, status_suffix(.status_code, .error_code))]
pub struct ServiceError {
    pub service_name: String,
    pub status_code: Option<u16>,
    pub message: String,
    pub kind: ErrorKind,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
    #[source]
    cause: Option<BoxError>,
}

impl ServiceError {
    pub fn new(service_name: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            status_code: None,
            message: message.into(),
            kind,
            error_code: None,
            request_id: None,
            cause: None,
        }
    }

    /// General HTTP-level error.
    pub fn api(service_name: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self::new(service_name, ErrorKind::Api, message).with_status(status_code)
    }

    /// A 404 refined with the kind and id of the missing resource.
    pub fn not_found(
        service_name: impl Into<String>,
        resource_kind: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        let resource_kind = resource_kind.into();
        let resource_id = resource_id.into();
        let message = format!("{} {:?} not found", resource_kind, resource_id);
        Self::new(
            service_name,
            ErrorKind::NotFound {
                resource_kind,
                resource_id,
            },
            message,
        )
        .with_status(404)
    }

    /// Service-specific refinement of `refines` with a fixed status code.
    pub fn domain(
        service_name: impl Into<String>,
        name: &'static str,
        refines: ErrorKind,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            service_name,
            ErrorKind::Domain {
                name,
                refines: Box::new(refines),
            },
            message,
        )
        .with_status(status_code)
    }

    pub fn connection(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service_name, ErrorKind::Connection, message)
    }

    pub fn timeout(service_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(service_name, ErrorKind::Timeout, message)
    }

    pub fn validation(service_name: impl Into<String>, error: ValidationError) -> Self {
        let message = error.to_string();
        Self::new(service_name, ErrorKind::Validation(error), message)
    }

    pub fn configuration(service_name: impl Into<String>, error: ConfigurationError) -> Self {
        let message = error.to_string();
        Self::new(service_name, ErrorKind::Configuration, message).with_cause(error)
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// The low-level error this one was raised from, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Re-tag an HTTP-level error by status code.
    ///
    /// When `mapper` returns a refined error, the refined error is returned with
    /// `self` attached as its cause, and inherits the status code, error code and
    /// request id it does not set itself. Errors without a status code, and
    /// statuses the mapper leaves alone, come back unchanged.
    pub fn map_status<F>(self, mapper: F) -> ServiceError
    where
        F: FnOnce(u16, &ServiceError) -> Option<ServiceError>,
    {
        let Some(status) = self.status_code else {
            return self;
        };
        match mapper(status, &self) {
            Some(mut refined) => {
                refined.status_code = refined.status_code.or(Some(status));
                refined.error_code = refined.error_code.or_else(|| self.error_code.clone());
                refined.request_id = refined.request_id.or_else(|| self.request_id.clone());
                refined.with_cause(self)
            }
            None => self,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::NotFound { .. }) || self.status_code == Some(404)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::RateLimited { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::Unavailable { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::Authentication)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::Validation(_))
    }

    /// Connection failure or timeout; no HTTP response was received.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind.base(), ErrorKind::Connection | ErrorKind::Timeout)
    }

    /// An HTTP response was received and carried an error status.
    pub fn is_http(&self) -> bool {
        self.status_code.is_some()
    }

    /// Whether repeating the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind.base() {
            ErrorKind::Connection
            | ErrorKind::Timeout
            | ErrorKind::RateLimited { .. }
            | ErrorKind::Unavailable { .. } => true,
            ErrorKind::Api => matches!(self.status_code, Some(500 | 502 | 504)),
            _ => false,
        }
    }

    /// `Retry-After` hint carried by rate-limit and unavailable errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind.base() {
            ErrorKind::RateLimited { retry_after } | ErrorKind::Unavailable { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Name of the outermost domain refinement, if any.
    pub fn domain_name(&self) -> Option<&'static str> {
        match &self.kind {
            ErrorKind::Domain { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this error is, or refines, the domain kind `name`.
    pub fn is_domain(&self, name: &str) -> bool {
        self.kind.has_domain(name)
    }

    /// Validation details when this is a payload mismatch.
    pub fn validation_error(&self) -> Option<&ValidationError> {
        match self.kind.base() {
            ErrorKind::Validation(error) => Some(error),
            _ => None,
        }
    }
}

fn status_suffix(status_code: &Option<u16>, error_code: &Option<String>) -> String {
    let mut suffix = String::new();
    if let Some(status) = status_code {
        suffix.push_str(&format!(" (HTTP {})", status));
    }
    if let Some(code) = error_code {
        suffix.push_str(&format!(" [{}]", code));
    }
    suffix
}
