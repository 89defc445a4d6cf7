//! Base for the resource groups of a concrete SDK.
//!
//! A resource wraps the client's shared [`Transport`] and exposes typed
//! operations for one area of the API. [`BaseResource`] does the plumbing:
//! send the request, validate the body as a [`Model`], and hand back any
//! [`ServiceError`] for the resource to refine with [`ServiceError::map_status`].
//!
//! # Example
//! ```rust,ignore
//! pub struct UsersResource {
//!     base: BaseResource,
//! }
//!
//! impl Resource for UsersResource {
//!     const NAME: &'static str = "users";
//!
//!     fn from_transport(transport: Arc<Transport>) -> Self {
//!         Self { base: BaseResource::new(transport) }
//!     }
//! }
//!
//! impl UsersResource {
//!     pub async fn get(&self, id: &str) -> Result<User, ServiceError> {
//!         self.base
//!             .get_model(&format!("/users/{}", id), &[])
//!             .await
//!             .map_err(|e| e.map_status(|status, e| match status {
//!                 404 => Some(ServiceError::not_found(&e.service_name, "user", id)),
//!                 _ => None,
//!             }))
//!     }
//! }
//! ```

use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ServiceError, ValidationError, ROOT_FIELD};
use crate::http::{HttpResponse, RequestOptions, Transport};
use crate::model::Model;

/// A group of related operations bound to a client's transport.
pub trait Resource: Sized {
    /// Name under which the client registers the resource.
    const NAME: &'static str;

    fn from_transport(transport: Arc<Transport>) -> Self;
}

/// Typed request helpers over a shared [`Transport`].
#[derive(Debug, Clone)]
pub struct BaseResource {
    transport: Arc<Transport>,
}

impl BaseResource {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn service_name(&self) -> &str {
        self.transport.service_name()
    }

    /// GET `path` and validate the body as `M`.
    pub async fn get_model<M: Model>(&self, path: &str, params: &[(&str, &str)]) -> Result<M, ServiceError> {
        let response = self.transport.get(path, params).await?;
        self.parse(&response)
    }

    /// GET `path` and validate the body as a list of `M`.
    pub async fn get_list<M: Model>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<M>, ServiceError> {
        let response = self.transport.get(path, params).await?;
        let body = self.body(&response)?;
        M::validate_list(&body).map_err(|e| ServiceError::validation(self.service_name(), e))
    }

    pub async fn post_model<M: Model>(&self, path: &str, body: Value) -> Result<M, ServiceError> {
        let response = self.transport.post(path, body).await?;
        self.parse(&response)
    }

    pub async fn put_model<M: Model>(&self, path: &str, body: Value) -> Result<M, ServiceError> {
        let response = self.transport.put(path, body).await?;
        self.parse(&response)
    }

    pub async fn patch_model<M: Model>(&self, path: &str, body: Value) -> Result<M, ServiceError> {
        let response = self.transport.patch(path, body).await?;
        self.parse(&response)
    }

    /// DELETE `path`, ignoring any response body.
    pub async fn delete(&self, path: &str) -> Result<(), ServiceError> {
        self.transport.delete(path).await.map(|_| ())
    }

    /// Send an arbitrary request and validate the body as `M`.
    pub async fn request_model<M: Model>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<M, ServiceError> {
        let response = self.transport.execute(method, path, options).await?;
        self.parse(&response)
    }

    /// Serialize a model into a request body.
    pub fn encode<M: Model>(&self, model: &M, exclude_unset: bool) -> Result<Value, ServiceError> {
        model
            .serialize(exclude_unset)
            .map_err(|e| ServiceError::validation(self.service_name(), e))
    }

    fn parse<M: Model>(&self, response: &HttpResponse) -> Result<M, ServiceError> {
        let body = self.body(response)?;
        M::validate(&body).map_err(|e| {
            debug!(path = response.url.path(), "Response failed validation: {}", e);
            ServiceError::validation(self.service_name(), e)
        })
    }

    fn body(&self, response: &HttpResponse) -> Result<Value, ServiceError> {
        response.json_value().map_err(|e| {
            ServiceError::validation(
                self.service_name(),
                ValidationError::single(ROOT_FIELD, format!("invalid JSON: {}", e)),
            )
            .with_status(response.status.as_u16())
            .with_cause(e)
        })
    }
}
