//! Remote API seams: per-operation handlers and resource fetchers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tableside_core::{OperationType, ResourceKey};

/// Failure reported by a remote adapter.
///
/// Transient and permanent failures are not distinguished; callers leave the
/// operation queued either way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RemoteError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }
}

/// Applies one kind of mutation against the remote API.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn apply(&self, payload: &Value) -> Result<Value, RemoteError>;
}

/// Reads a full resource collection from the remote API.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, resource: &ResourceKey) -> Result<Value, RemoteError>;
}

/// Adapter turning an async closure into an [`OperationHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
{
    async fn apply(&self, payload: &Value) -> Result<Value, RemoteError> {
        (self.0)(payload.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no handler registered for: {}", join_types(.0))]
    Missing(Vec<OperationType>),
}

fn join_types(types: &[OperationType]) -> String {
    types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
}

/// One handler per [`OperationType`], checked complete at build time.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn handler(&self, operation: OperationType) -> &Arc<dyn OperationHandler> {
        &self.handlers[slot(operation)]
    }

    pub async fn apply(&self, operation: OperationType, payload: &Value) -> Result<Value, RemoteError> {
        self.handler(operation).apply(payload).await
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn slot(operation: OperationType) -> usize {
    OperationType::ALL
        .iter()
        .position(|t| *t == operation)
        .unwrap_or_default()
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<OperationType, Arc<dyn OperationHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register (or replace) the handler for `operation`.
    pub fn register(mut self, operation: OperationType, handler: Arc<dyn OperationHandler>) -> Self {
        if self.handlers.insert(operation, handler).is_some() {
            tracing::debug!(%operation, "replacing operation handler");
        }
        self
    }

    pub fn register_fn<F, Fut>(self, operation: OperationType, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        self.register(operation, Arc::new(FnHandler(f)))
    }

    /// Fails unless every known operation type has a handler.
    pub fn build(mut self) -> Result<HandlerRegistry, RegistryError> {
        let mut handlers = Vec::with_capacity(OperationType::ALL.len());
        let mut missing = Vec::new();

        for operation in OperationType::ALL {
            match self.handlers.remove(&operation) {
                Some(handler) => handlers.push(handler),
                None => missing.push(operation),
            }
        }

        if !missing.is_empty() {
            return Err(RegistryError::Missing(missing));
        }
        Ok(HandlerRegistry { handlers })
    }
}
