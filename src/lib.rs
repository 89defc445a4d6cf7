//! # sdkcore - shared core for typed REST service SDKs
//!
//! A small library that concrete service SDKs build on. It owns the parts
//! every SDK needs and none should rewrite: configuration, authentication,
//! a retrying HTTP transport, payload validation and a structured error
//! taxonomy.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Pluggable authentication (API key, bearer, basic, OAuth2 with refresh)
//! - Retries with fixed, linear or exponential backoff and `Retry-After`
//! - Schema-driven validation that reports every bad field at once
//! - One error type with capability queries and service-specific refinements
//!
//! ## Architecture
//!
//! A concrete SDK defines its models, its resources and its client:
//!
//! 1. **Models** implement [`Model`] to validate and serialize payloads
//! 2. **Resources** implement [`Resource`] and use [`BaseResource`] helpers
//! 3. **The client** wraps a [`BaseServiceClient`] and registers its resources
//!
//! All resources of a client send through the same [`Transport`].
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use sdkcore::{ApiKeyAuthenticator, BaseServiceClient, ClientConfiguration, ServiceSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfiguration::builder().with_max_retries(2).build()?;
//!     let settings = ServiceSettings::new("https://api.example.com/v1")?;
//!     let auth = Arc::new(ApiKeyAuthenticator::new("your-api-key"));
//!
//!     let client = BaseServiceClient::new("Example", config, settings, auth)?;
//!     let response = client.transport().get("/status", &[]).await?;
//!     println!("{}", response.json_value()?);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod http;
pub mod model;
pub mod resource;
pub mod retry;

// Re-exports for convenience
pub use auth::{
    AccessToken, ApiKeyAuthenticator, Authenticator, BasicAuthenticator, BearerTokenAuthenticator, ClientCredentials,
    NoAuth, OAuth2Authenticator, SecretString, TokenSource,
};
pub use client::{BaseServiceClient, ServiceClient};
pub use config::{ClientConfiguration, ServiceSettings};
pub use error::{ConfigurationError, ErrorKind, FieldViolation, ServiceError, ValidationError};
pub use http::{HttpResponse, RequestOptions, Transport};
pub use envelope::{ApiResponse, ErrorResponse, PaginatedResponse, ValidationErrorDetail, ValidationErrorResponse};
pub use model::{Identity, Metadata, Model, Timestamps, Tracked, UnknownFields};
pub use resource::{BaseResource, Resource};
pub use retry::BackoffStrategy;
