//! REST adapter: operation handlers, resource fetcher and health probe over
//! `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;

use tableside_core::{OperationType, ResourceKey};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityProbe, ProbeError};
use crate::remote::{HandlerRegistry, OperationHandler, RegistryError, RemoteError, ResourceFetcher};

/// HTTP client for the restaurant API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.auth_token.clone(),
        })
    }

    /// Registry with one handler per operation type, all backed by this client.
    pub fn handler_registry(self: &Arc<Self>) -> Result<HandlerRegistry, RegistryError> {
        OperationType::ALL
            .into_iter()
            .fold(HandlerRegistry::builder(), |builder, operation| {
                builder.register(
                    operation,
                    Arc::new(HttpOperation {
                        remote: Arc::clone(self),
                        operation,
                    }),
                )
            })
            .build()
    }

    /// Send one operation to its endpoint.
    pub async fn send(&self, operation: OperationType, payload: &Value) -> Result<Value, RemoteError> {
        let (method, path) = command_endpoint(operation, payload)?;
        let url = format!("{}{}", self.api_url, path);

        tracing::debug!(%operation, %method, %url, "sending operation");
        let req = self.authorized(self.client.request(method, &url)).json(payload);
        self.execute(req).await
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute(&self, req: RequestBuilder) -> Result<Value, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ResourceFetcher for HttpRemote {
    async fn fetch(&self, resource: &ResourceKey) -> Result<Value, RemoteError> {
        let url = format!("{}/api/{}", self.api_url, resource.as_str());
        let req = self.authorized(self.client.get(&url));
        self.execute(req).await
    }
}

struct HttpOperation {
    remote: Arc<HttpRemote>,
    operation: OperationType,
}

#[async_trait]
impl OperationHandler for HttpOperation {
    async fn apply(&self, payload: &Value) -> Result<Value, RemoteError> {
        self.remote.send(self.operation, payload).await
    }
}

/// Map an operation to its REST method and path.
pub fn command_endpoint(operation: OperationType, payload: &Value) -> Result<(Method, String), RemoteError> {
    let endpoint = match operation {
        OperationType::CreateOrder => (Method::POST, "/api/orders".to_string()),
        OperationType::UpdateOrderStatus => (
            Method::PATCH,
            format!("/api/orders/{}/status", path_id(payload, "orderId")?),
        ),
        OperationType::UpdateItemStatus => (
            Method::PATCH,
            format!(
                "/api/orders/{}/items/{}/status",
                path_id(payload, "orderId")?,
                path_id(payload, "itemId")?
            ),
        ),
        OperationType::UpdateTableStatus => (
            Method::PATCH,
            format!("/api/tables/{}/status", path_id(payload, "tableId")?),
        ),
        OperationType::AssignWaiter => (
            Method::PATCH,
            format!("/api/tables/{}/waiter", path_id(payload, "tableId")?),
        ),
        OperationType::CreateBill => (Method::POST, "/api/bills".to_string()),
        OperationType::PayBill => (
            Method::POST,
            format!("/api/bills/{}/pay", path_id(payload, "billId")?),
        ),
    };
    Ok(endpoint)
}

fn path_id(payload: &Value, field: &str) -> Result<String, RemoteError> {
    let id = match payload.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(RemoteError::invalid_payload(format!("missing {field}"))),
    };

    if id.contains('/') || id.contains('?') || id.contains('#') {
        return Err(RemoteError::invalid_payload(format!("{field} is not a valid path segment")));
    }
    Ok(id)
}

/// Probe that reports online when `GET {api_url}/health` answers 2xx.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    health_url: String,
}

impl HttpProbe {
    pub fn new(config: &SyncConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            health_url: format!("{}/health", config.api_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn fetch_now(&self) -> Result<bool, ProbeError> {
        // Unreachable means offline, not "signal unavailable".
        match self.client.get(&self.health_url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(err) => {
                tracing::debug!(error = %err, "health check failed");
                Ok(false)
            }
        }
    }
}
