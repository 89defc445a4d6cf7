//! Base for concrete service clients.

use std::sync::Arc;
use tracing::debug;

use crate::auth::Authenticator;
use crate::config::{ClientConfiguration, ServiceSettings};
use crate::error::ServiceError;
use crate::http::Transport;
use crate::resource::Resource;

/// Shared state behind a concrete service client.
///
/// Holds the configuration, the service settings and the one [`Transport`]
/// every registered resource sends through. The connection pool is opened on
/// the first request and released once the client and all of its resources
/// are dropped.
#[derive(Debug)]
pub struct BaseServiceClient {
    service_name: String,
    config: Arc<ClientConfiguration>,
    settings: ServiceSettings,
    transport: Arc<Transport>,
    resources: Vec<&'static str>,
}

impl BaseServiceClient {
    pub fn new(
        service_name: impl Into<String>,
        config: ClientConfiguration,
        settings: ServiceSettings,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ServiceError> {
        let service_name = service_name.into();
        let config = Arc::new(config);
        let transport = Transport::new(
            service_name.clone(),
            settings.base_url().clone(),
            Arc::clone(&config),
            authenticator,
        )
        .map_err(|e| ServiceError::configuration(&service_name, e))?;

        debug!(service = %service_name, base_url = %settings.base_url(), "Created service client");
        Ok(Self {
            service_name,
            config,
            settings,
            transport: Arc::new(transport),
            resources: Vec::new(),
        })
    }

    /// Build a client around a prepared transport.
    pub fn from_transport(settings: ServiceSettings, transport: Transport) -> Self {
        Self {
            service_name: transport.service_name().to_string(),
            config: Arc::new(transport.config().clone()),
            settings,
            transport: Arc::new(transport),
            resources: Vec::new(),
        }
    }

    /// Create a resource bound to the shared transport.
    pub fn register<R: Resource>(&mut self) -> R {
        if !self.resources.contains(&R::NAME) {
            self.resources.push(R::NAME);
        }
        R::from_transport(Arc::clone(&self.transport))
    }

    /// Names of the resources registered so far, in registration order.
    pub fn resource_names(&self) -> &[&'static str] {
        &self.resources
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &ClientConfiguration {
        &self.config
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

/// Implemented by every concrete service client.
///
/// # Example
/// ```rust,ignore
/// pub struct UsersClient {
///     base: BaseServiceClient,
///     pub users: UsersResource,
/// }
///
/// impl ServiceClient for UsersClient {
///     fn service_name(&self) -> &str {
///         "Users"
///     }
///
///     fn base(&self) -> &BaseServiceClient {
///         &self.base
///     }
/// }
/// ```
pub trait ServiceClient {
    fn service_name(&self) -> &str;

    fn base(&self) -> &BaseServiceClient;

    fn base_url(&self) -> &reqwest::Url {
        self.base().settings().base_url()
    }

    fn transport(&self) -> &Arc<Transport> {
        self.base().transport()
    }
}
