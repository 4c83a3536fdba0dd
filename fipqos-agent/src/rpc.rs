use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use fipqos_common::QosPolicy;
use futures::Stream;
use tokio::sync::mpsc;

/// Request context passed along with resource pulls and pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcContext {
    pub request_id: String,
    pub is_admin: bool,
}

impl RpcContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), is_admin: false }
    }

    /// An administrative context, used for agent-initiated requests.
    pub fn admin() -> Self {
        Self { request_id: "req-agent".to_string(), is_admin: true }
    }
}

/// The kinds of resources the extension synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    QosPolicy,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QosPolicy => f.write_str("qos_policy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("{resource_type} {id} not found")]
    NotFound { resource_type: ResourceType, id: String },
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

/// Synchronous fetch of the current state of a resource.
pub trait PolicyPull: Send + Sync {
    fn pull(
        &self,
        context: &RpcContext,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<QosPolicy, RpcError>;
}

/// A pushed notification about one or more resources.
#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    pub context: RpcContext,
    pub resource_type: ResourceType,
    pub resources: Vec<QosPolicy>,
    pub event: EventType,
}

/// Subscription to pushed resource notifications.
#[async_trait]
pub trait PushSubscriber: Send + Sync {
    /// Subscribes to notifications about `resource_type`. At most `buffer` notifications are
    /// queued before the publisher is back-pressured.
    async fn subscribe(
        &self,
        resource_type: ResourceType,
        buffer: usize,
    ) -> Result<ResourceUpdates, RpcError>;
}

/// The stream of notifications of a subscription. Ends when the publisher goes away.
#[derive(Debug)]
pub struct ResourceUpdates {
    rx: mpsc::Receiver<ResourceUpdate>,
}

impl ResourceUpdates {
    /// Creates a subscription channel, returning the publishing half and the stream.
    pub fn channel(buffer: usize) -> (mpsc::Sender<ResourceUpdate>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

impl From<mpsc::Receiver<ResourceUpdate>> for ResourceUpdates {
    fn from(rx: mpsc::Receiver<ResourceUpdate>) -> Self {
        Self { rx }
    }
}

impl Stream for ResourceUpdates {
    type Item = ResourceUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
