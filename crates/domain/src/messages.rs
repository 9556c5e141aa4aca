use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{NotificationInput, NotificationKind, NotificationService};
use crate::ports::messages::ChatMessageRepository;
use crate::ports::realtime::{ChannelKey, RealtimeBus, RealtimeSubscription, RowEvent, RowOperation};
use crate::ports::rooms::ChatRoomRepository;
use crate::rooms::ChatRoom;
use crate::util::now_ms;
use crate::DomainResult;

const MAX_CONTENT_LENGTH: usize = 4_000;
const PREVIEW_LENGTH: usize = 80;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    FileLink,
}

/// Append-only chat row. Total order within a room is creation-time order;
/// a message always belongs to a room whose membership includes its sender.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub created_at_ms: i64,
    pub client_request_id: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
pub struct SendMessageInput {
    pub room_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub client_request_id: String,
    pub correlation_id: String,
}

/// A failed send hands the drafted input back to the caller so the text is
/// never silently discarded; retrying with the same client request id
/// replays instead of duplicating.
#[derive(Debug)]
pub struct SendFailure {
    pub draft: SendMessageInput,
    pub error: DomainError,
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "message send failed: {}", self.error)
    }
}

impl std::error::Error for SendFailure {}

#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn ChatMessageRepository>,
    rooms: Arc<dyn ChatRoomRepository>,
    bus: Arc<dyn RealtimeBus>,
    notifications: NotificationService,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn ChatMessageRepository>,
        rooms: Arc<dyn ChatRoomRepository>,
        bus: Arc<dyn RealtimeBus>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            messages,
            rooms,
            bus,
            notifications,
        }
    }

    pub async fn send(
        &self,
        actor: &ActorIdentity,
        input: SendMessageInput,
    ) -> Result<ChatMessage, SendFailure> {
        match self.send_inner(actor, &input).await {
            Ok(message) => Ok(message),
            Err(error) => Err(SendFailure {
                draft: input,
                error,
            }),
        }
    }

    async fn send_inner(
        &self,
        actor: &ActorIdentity,
        input: &SendMessageInput,
    ) -> DomainResult<ChatMessage> {
        let room = self.resolve_room(&input.room_id).await?;
        if !room.has_participant(&actor.user_id) {
            return Err(DomainError::Forbidden(
                "sender is not a room participant".into(),
            ));
        }
        let content = validate_content(&input.content, input.kind)?;

        // A replayed send falls through to the side effects below rather
        // than returning early: an earlier attempt may have failed between
        // the insert and the counterpart notification. Every step downstream
        // is idempotent because it keys on the stored message id.
        let existing = self
            .messages
            .get_by_client_request(&room.room_id, &input.client_request_id)
            .await?;
        let stored = match existing {
            Some(existing) => existing,
            None => {
                let message = ChatMessage {
                    message_id: crate::util::uuid_v7_without_dashes(),
                    room_id: room.room_id.clone(),
                    sender_id: actor.user_id.clone(),
                    content,
                    kind: input.kind,
                    created_at_ms: now_ms(),
                    client_request_id: input.client_request_id.clone(),
                    correlation_id: input.correlation_id.clone(),
                };
                match self.messages.create(&message).await {
                    Ok(stored) => stored,
                    Err(DomainError::Conflict) => {
                        // Duplicate send that raced our existence check.
                        self.messages
                            .get_by_client_request(&room.room_id, &input.client_request_id)
                            .await?
                            .ok_or(DomainError::Conflict)?
                    }
                    Err(err) => {
                        return Err(DomainError::Delivery(format!(
                            "message insert failed: {err}"
                        )));
                    }
                }
            }
        };

        if let Err(err) = self
            .rooms
            .touch_last_message(&room.room_id, stored.created_at_ms)
            .await
        {
            tracing::warn!(
                room_id = %room.room_id,
                error = %err,
                "failed to bump room last_message_at"
            );
        }

        self.publish_insert(&stored).await;
        self.notify_counterpart(actor, &room, &stored).await?;
        tracing::info!(
            message_id = %stored.message_id,
            room_id = %stored.room_id,
            created_at = %crate::util::format_ms_rfc3339(stored.created_at_ms),
            correlation_id = %stored.correlation_id,
            "chat message stored"
        );
        Ok(stored)
    }

    /// All messages of the room, creation order ascending. Establishes the
    /// baseline before live events are layered on.
    pub async fn history(
        &self,
        actor: &ActorIdentity,
        room_id: &str,
    ) -> DomainResult<Vec<ChatMessage>> {
        let room = self.resolve_room(room_id).await?;
        if !room.has_participant(&actor.user_id) {
            return Err(DomainError::NotFound);
        }
        self.messages.list_by_room(room_id).await
    }

    /// Live message events for an open room view. The returned handle must
    /// be closed on teardown before the same filter is subscribed again.
    pub async fn subscribe(
        &self,
        actor: &ActorIdentity,
        room_id: &str,
    ) -> DomainResult<RealtimeSubscription> {
        let room = self.resolve_room(room_id).await?;
        if !room.has_participant(&actor.user_id) {
            return Err(DomainError::NotFound);
        }
        self.bus.subscribe(&ChannelKey::chat_room(room_id)).await
    }

    async fn resolve_room(&self, room_id: &str) -> DomainResult<ChatRoom> {
        self.rooms
            .get(room_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    async fn publish_insert(&self, message: &ChatMessage) {
        let event = match RowEvent::insert(message) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode chat row event");
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(&ChannelKey::chat_room(&message.room_id), event)
            .await
        {
            // The row is durable; subscribers recover via history replay.
            tracing::warn!(
                room_id = %message.room_id,
                message_id = %message.message_id,
                error = %err,
                "chat realtime publish failed"
            );
        }
    }

    async fn notify_counterpart(
        &self,
        actor: &ActorIdentity,
        room: &ChatRoom,
        message: &ChatMessage,
    ) -> DomainResult<()> {
        let Some(recipient) = room.counterpart_of(&actor.user_id) else {
            return Ok(());
        };
        let input = NotificationInput {
            recipient_id: recipient.to_string(),
            title: format!("New message from {}", actor.username),
            body: preview(message),
            kind: NotificationKind::ChatMessage {
                room_id: room.room_id.clone(),
                sender_id: actor.user_id.clone(),
                sender_username: actor.username.clone(),
                preview: preview(message),
            },
            // Stable across send replays: the stored message id.
            dedupe_key: Some(format!("chat_message:{}", message.message_id)),
            client_request_id: message.client_request_id.clone(),
            correlation_id: message.correlation_id.clone(),
        };
        self.notifications.emit(input).await?;
        Ok(())
    }
}

fn preview(message: &ChatMessage) -> String {
    match message.kind {
        MessageKind::Text => message.content.chars().take(PREVIEW_LENGTH).collect(),
        MessageKind::FileLink => "Sent a file".to_string(),
    }
}

fn validate_content(content: &str, kind: MessageKind) -> DomainResult<String> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(DomainError::Validation("content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(DomainError::Validation(format!(
            "content exceeds max length of {MAX_CONTENT_LENGTH}"
        )));
    }
    if kind == MessageKind::FileLink
        && !(content.starts_with("https://") || content.starts_with("http://"))
    {
        return Err(DomainError::Validation(
            "file_link content must be a public URL".into(),
        ));
    }
    Ok(content)
}

/// Client-local ordered view over a room: the history baseline plus live
/// events, deduplicated by message id. Presentation state only; nothing here
/// is durable.
#[derive(Debug)]
pub struct MessageView {
    room_id: String,
    viewer_id: String,
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
    unread: usize,
    at_bottom: bool,
}

impl MessageView {
    pub fn new(room_id: impl Into<String>, viewer_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            viewer_id: viewer_id.into(),
            messages: Vec::new(),
            seen: HashSet::new(),
            unread: 0,
            at_bottom: true,
        }
    }

    /// Load the history baseline. Messages already present by id are kept.
    pub fn seed_history(&mut self, history: Vec<ChatMessage>) {
        for message in history {
            self.insert_ordered(message);
        }
    }

    /// Merge one realtime event; duplicate delivery is a no-op. Returns
    /// whether a new message appeared.
    pub fn apply_event(&mut self, event: &RowEvent) -> DomainResult<bool> {
        if event.operation != RowOperation::Insert {
            // Messages are append-only; updates/deletes do not occur here.
            return Ok(false);
        }
        let message: ChatMessage = serde_json::from_value(event.row.clone())
            .map_err(|err| DomainError::Validation(format!("malformed chat row event: {err}")))?;
        Ok(self.apply_message(message))
    }

    pub fn apply_message(&mut self, message: ChatMessage) -> bool {
        if message.room_id != self.room_id {
            return false;
        }
        let from_counterpart = message.sender_id != self.viewer_id;
        if !self.insert_ordered(message) {
            return false;
        }
        // At the bottom the view auto-scrolls; away from it the counter grows.
        if from_counterpart && !self.at_bottom {
            self.unread += 1;
        }
        true
    }

    pub fn set_at_bottom(&mut self, at_bottom: bool) {
        self.at_bottom = at_bottom;
        if at_bottom {
            self.unread = 0;
        }
    }

    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn insert_ordered(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.message_id.clone()) {
            return false;
        }
        let position = self
            .messages
            .partition_point(|existing| {
                (existing.created_at_ms, existing.message_id.as_str())
                    <= (message.created_at_ms, message.message_id.as_str())
            });
        self.messages.insert(position, message);
        true
    }
}
