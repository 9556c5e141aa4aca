use crate::rooms::ChatRoom;
use crate::DomainResult;

pub trait ChatRoomRepository: Send + Sync {
    /// Insert a new room. The store enforces uniqueness on
    /// `(business_id, member_id)` and answers `Conflict` when a room for the
    /// pair already exists; the provisioner treats that as success.
    fn create(&self, room: &ChatRoom) -> crate::ports::BoxFuture<'_, DomainResult<ChatRoom>>;

    fn get(&self, room_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<Option<ChatRoom>>>;

    fn find_by_pair(
        &self,
        business_id: &str,
        member_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ChatRoom>>>;

    fn list_for_user(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatRoom>>>;

    fn touch_last_message(
        &self,
        room_id: &str,
        at_ms: i64,
    ) -> crate::ports::BoxFuture<'_, DomainResult<()>>;
}
