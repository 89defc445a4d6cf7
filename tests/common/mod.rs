//! A small users SDK built on the core, plus test servers and helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::Method;
use sdkcore::auth::AuthError;
use sdkcore::model::{FieldReader, FieldWriter};
use sdkcore::retry::Sleeper;
use sdkcore::{
    Authenticator, BaseResource, BaseServiceClient, ClientConfiguration, ErrorKind, Model, PaginatedResponse,
    RequestOptions, Resource, ServiceClient, ServiceError, ServiceSettings, Tracked, Transport,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SERVICE: &str = "Users";
pub const USER_NOT_FOUND: &str = "UserNotFound";
pub const DUPLICATE_EMAIL: &str = "DuplicateEmail";

fn check_email(email: &String) -> Result<(), String> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(format!("{:?} is not a valid email address", email)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: Option<u32>,
    pub role: Tracked<String>,
}

impl Model for User {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let id = f.required("id");
        let name = f.required("name");
        let email = f.required_with("email", check_email);
        let age = f.optional_with("age", |age: &u32| {
            if *age <= 150 {
                Ok(())
            } else {
                Err("must be at most 150".to_string())
            }
        });
        let role = f.tracked("role", "member".to_string());
        Some(Self {
            id: id?,
            name: name?,
            email: email?,
            age: age?,
            role: role?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.field("id", &self.id);
        w.field("name", &self.name);
        w.field("email", &self.email);
        w.optional("age", &self.age);
        w.tracked("role", &self.role);
    }
}

/// Body of a partial update; only fields that were set are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub name: Tracked<String>,
    pub email: Tracked<String>,
    pub role: Tracked<String>,
}

impl Model for UserUpdate {
    fn read_fields(f: &mut FieldReader<'_>) -> Option<Self> {
        let name = f.tracked("name", String::new());
        let email = f.tracked("email", String::new());
        let role = f.tracked("role", String::new());
        Some(Self {
            name: name?,
            email: email?,
            role: role?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter) {
        w.tracked("name", &self.name);
        w.tracked("email", &self.email);
        w.tracked("role", &self.role);
    }
}

pub fn user_not_found(id: &str) -> ServiceError {
    ServiceError::domain(
        SERVICE,
        USER_NOT_FOUND,
        ErrorKind::NotFound {
            resource_kind: "user".to_string(),
            resource_id: id.to_string(),
        },
        404,
        format!("user {:?} not found", id),
    )
}

pub fn duplicate_email(email: &str) -> ServiceError {
    ServiceError::domain(
        SERVICE,
        DUPLICATE_EMAIL,
        ErrorKind::Api,
        409,
        format!("email {} is already registered", email),
    )
}

pub struct UsersResource {
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
    pub fn base(&self) -> &BaseResource {
        &self.base
    }

    pub async fn get(&self, id: &str) -> Result<User, ServiceError> {
        self.base
            .get_model(&format!("/users/{}", id), &[])
            .await
            .map_err(|e| {
                e.map_status(|status, _| match status {
                    404 => Some(user_not_found(id)),
                    _ => None,
                })
            })
    }

    pub async fn list(&self, page: u32, limit: u32) -> Result<PaginatedResponse<User>, ServiceError> {
        let page = page.to_string();
        let limit = limit.to_string();
        self.base
            .get_model("/users", &[("page", page.as_str()), ("limit", limit.as_str())])
            .await
    }

    pub async fn create(&self, name: &str, email: &str) -> Result<User, ServiceError> {
        let body = serde_json::json!({"name": name, "email": email});
        self.base.post_model("/users", body).await.map_err(|e| {
            e.map_status(|status, _| match status {
                409 => Some(duplicate_email(email)),
                _ => None,
            })
        })
    }

    pub async fn update(&self, id: &str, update: &UserUpdate) -> Result<User, ServiceError> {
        let body = self.base.encode(update, true)?;
        self.base
            .patch_model(&format!("/users/{}", id), body)
            .await
            .map_err(|e| {
                e.map_status(|status, _| match status {
                    404 => Some(user_not_found(id)),
                    _ => None,
                })
            })
    }

    /// POST that the caller marks as safe to repeat.
    pub async fn import(&self, payload: Value) -> Result<User, ServiceError> {
        let options = RequestOptions::new().with_json(payload).with_retry_non_idempotent(true);
        self.base.request_model(Method::POST, "/users/import", options).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.base.delete(&format!("/users/{}", id)).await
    }
}

pub struct UsersClient {
    base: BaseServiceClient,
    pub users: UsersResource,
}

impl UsersClient {
    pub fn new(
        config: ClientConfiguration,
        settings: ServiceSettings,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ServiceError> {
        Ok(Self::from_base(BaseServiceClient::new(SERVICE, config, settings, authenticator)?))
    }

    /// Client whose backoff sleeps are recorded instead of waited out.
    pub fn recording(
        config: ClientConfiguration,
        base_url: &str,
        authenticator: Arc<dyn Authenticator>,
        sleeper: Arc<RecordingSleeper>,
    ) -> Self {
        let settings = ServiceSettings::new(base_url).unwrap();
        let transport = Transport::new(SERVICE, settings.base_url().clone(), Arc::new(config), authenticator)
            .unwrap()
            .with_sleeper(sleeper);
        Self::from_base(BaseServiceClient::from_transport(settings, transport))
    }

    fn from_base(mut base: BaseServiceClient) -> Self {
        let users = base.register();
        Self { base, users }
    }
}

impl ServiceClient for UsersClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    fn base(&self) -> &BaseServiceClient {
        &self.base
    }
}

pub fn config(max_retries: u32) -> ClientConfiguration {
    ClientConfiguration::builder()
        .with_max_retries(max_retries)
        .with_timeout(Duration::from_secs(5))
        .with_retry_delay(Duration::from_millis(100))
        .with_retry_jitter(false)
        .with_debug_requests(true)
        .build()
        .unwrap()
}

pub fn user_json(id: &str) -> String {
    format!(
        r#"{{"id": "{}", "name": "Ada", "email": "ada@example.com", "role": "admin"}}"#,
        id
    )
}

/// Records requested backoff delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.delays.lock().unwrap().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

/// Counts how often requests are decorated.
#[derive(Debug, Default)]
pub struct CountingAuthenticator {
    calls: AtomicUsize,
}

impl CountingAuthenticator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuthenticator {
    async fn decorate(&self, mut request: reqwest::Request) -> Result<reqwest::Request, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer attempt-{}", n))
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?;
        request.headers_mut().insert(reqwest::header::AUTHORIZATION, value);
        Ok(request)
    }
}

/// A server whose first `stall` connections never answer, then answers 200
/// with `body`. Returns its base URL and the connection counter.
pub async fn stalling_server(stall: usize, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(len) => read += len,
                    }
                    if read == buf.len() {
                        break;
                    }
                }

                if n < stall {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), connections)
}

/// A URL on which nothing is listening.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
