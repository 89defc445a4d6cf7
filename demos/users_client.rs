//! A minimal SDK built on sdkcore, talking to a public JSON placeholder API.
//!
//! ```text
//! cargo run --example users_client
//! USERS_API_URL=http://localhost:8080 cargo run --example users_client
//! ```

use std::sync::Arc;
use std::time::Duration;

use sdkcore::model::{FieldReader, FieldWriter};
use sdkcore::{
    BaseResource, BaseServiceClient, ClientConfiguration, ErrorKind, Model, NoAuth, Resource, ServiceClient,
    ServiceError, ServiceSettings, Transport,
};

const SERVICE: &str = "Placeholder";

#[derive(Debug, Clone)]
struct User {
    id: u64,
    name: String,
    email: String,
}

impl Model for User {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let id = f.required("id");
        let name = f.required("name");
        let email = f.required("email");
        Some(Self {
            id: id?,
            name: name?,
            email: email?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("id", &self.id);
        w.field("name", &self.name);
        w.field("email", &self.email);
    }
}

struct UsersResource {
    base: BaseResource,
}

impl Resource for UsersResource {
    const NAME: &'static str = "users";

    fn from_transport(transport: Arc<Transport>) -> Self {
        Self {
            base: BaseResource::new(transport),
        }
    }
}

impl UsersResource {
    async fn get(&self, id: u64) -> Result<User, ServiceError> {
        self.base
            .get_model(&format!("/users/{}", id), &[])
            .await
            .map_err(|e| {
                e.map_status(|status, _| match status {
                    404 => Some(ServiceError::not_found(SERVICE, "user", id.to_string())),
                    _ => None,
                })
            })
    }

    async fn list(&self) -> Result<Vec<User>, ServiceError> {
        self.base.get_list("/users", &[]).await
    }
}

struct PlaceholderClient {
    base: BaseServiceClient,
    users: UsersResource,
}

impl PlaceholderClient {
    fn new(base_url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config = ClientConfiguration::builder()
            .with_timeout(Duration::from_secs(10))
            .with_max_retries(2)
            .build()?;
        let settings = ServiceSettings::new(base_url)?.with_api_version("v1");
        let mut base = BaseServiceClient::new(SERVICE, config, settings, Arc::new(NoAuth))?;
        let users = base.register();
        Ok(Self { base, users })
    }
}

impl ServiceClient for PlaceholderClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    fn base(&self) -> &BaseServiceClient {
        &self.base
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url =
        std::env::var("USERS_API_URL").unwrap_or_else(|_| "https://jsonplaceholder.typicode.com".to_string());
    let client = PlaceholderClient::new(&base_url)?;
    println!("{} at {}", client.service_name(), client.base_url());

    for user in client.users.list().await?.iter().take(3) {
        println!("#{} {} <{}>", user.id, user.name, user.email);
    }

    match client.users.get(9999).await {
        Ok(user) => println!("unexpectedly found {}", user.name),
        Err(err) if err.is_not_found() => {
            if let ErrorKind::NotFound { resource_id, .. } = err.kind.base() {
                println!("no user {}: {}", resource_id, err);
            }
        }
        Err(err) if err.is_retryable() => println!("service unavailable, try later: {}", err),
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
