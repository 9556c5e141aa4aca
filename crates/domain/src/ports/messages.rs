use crate::messages::ChatMessage;
use crate::DomainResult;

pub trait ChatMessageRepository: Send + Sync {
    /// Append a message. `Conflict` when the room already holds a message
    /// with the same client request id (duplicate send).
    fn create(
        &self,
        message: &ChatMessage,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ChatMessage>>;

    fn get_by_client_request(
        &self,
        room_id: &str,
        client_request_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ChatMessage>>>;

    /// All messages of a room, creation order ascending
    /// (`created_at_ms`, then `message_id`).
    fn list_by_room(
        &self,
        room_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatMessage>>>;
}
