use crate::notifications::Notification;
use crate::DomainResult;

pub trait NotificationRepository: Send + Sync {
    /// Insert a notification. `Conflict` when the recipient already has a
    /// row with the same dedupe key; the service replays the stored row.
    fn create(
        &self,
        notification: &Notification,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Notification>>;

    fn get(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Notification>>>;

    fn get_by_dedupe_key(
        &self,
        user_id: &str,
        dedupe_key: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<Notification>>>;

    /// Recipient's notifications, created_at descending.
    fn list_for_user(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<Notification>>>;

    fn set_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Notification>>;

    fn set_emailed(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<()>>;

    fn delete(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<()>>;

    /// Every chat-message notification of one conversation group,
    /// i.e. rows whose payload matches `(sender_id, room_id)`.
    fn list_chat_group(
        &self,
        user_id: &str,
        sender_id: &str,
        room_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<Notification>>>;
}
