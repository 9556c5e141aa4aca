use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::DomainResult;

/// A realtime channel is keyed by table plus an equality filter, mirroring
/// how the bus filters row-change events for subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl ChannelKey {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn chat_room(room_id: &str) -> Self {
        Self::new("chat_messages", "room_id", room_id)
    }

    pub fn notifications_for(user_id: &str) -> Self {
        Self::new("notifications", "user_id", user_id)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", self.table, self.column, self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowEvent {
    pub operation: RowOperation,
    pub row: serde_json::Value,
}

impl RowEvent {
    pub fn insert<T: Serialize>(row: &T) -> DomainResult<Self> {
        Ok(Self {
            operation: RowOperation::Insert,
            row: to_row(row)?,
        })
    }

    pub fn update<T: Serialize>(row: &T) -> DomainResult<Self> {
        Ok(Self {
            operation: RowOperation::Update,
            row: to_row(row)?,
        })
    }

    pub fn delete<T: Serialize>(row: &T) -> DomainResult<Self> {
        Ok(Self {
            operation: RowOperation::Delete,
            row: to_row(row)?,
        })
    }
}

fn to_row<T: Serialize>(row: &T) -> DomainResult<serde_json::Value> {
    serde_json::to_value(row).map_err(|err| {
        crate::error::DomainError::Validation(format!("failed to serialize row event: {err}"))
    })
}

/// Publish/subscribe bus delivering row-change events. Delivery is
/// at-least-once and preserves commit order within one channel; there is no
/// ordering guarantee across channels.
pub trait RealtimeBus: Send + Sync {
    fn subscribe(
        &self,
        channel: &ChannelKey,
    ) -> crate::ports::BoxFuture<'_, DomainResult<RealtimeSubscription>>;

    fn publish(
        &self,
        channel: &ChannelKey,
        event: RowEvent,
    ) -> crate::ports::BoxFuture<'_, DomainResult<()>>;
}

/// Live handle on one channel, owned by whatever scope holds the open view.
/// Must be torn down exactly once: explicitly through [`close`](Self::close),
/// or on drop as a fallback. Teardown completes before a new subscription on
/// the same filter is opened.
pub struct RealtimeSubscription {
    receiver: mpsc::UnboundedReceiver<RowEvent>,
    canceller: Option<Box<dyn FnOnce() + Send>>,
}

impl RealtimeSubscription {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<RowEvent>,
        canceller: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            receiver,
            canceller: Some(canceller),
        }
    }

    pub async fn recv(&mut self) -> Option<RowEvent> {
        self.receiver.recv().await
    }

    /// Non-blocking drain of already-buffered events.
    pub fn try_recv(&mut self) -> Option<RowEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn close(mut self) {
        self.close_once();
    }

    fn close_once(&mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
        self.receiver.close();
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.close_once();
    }
}

impl fmt::Debug for RealtimeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSubscription")
            .field("open", &self.canceller.is_some())
            .finish()
    }
}
