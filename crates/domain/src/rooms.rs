use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::rooms::ChatRoomRepository;
use crate::util::{backoff_ms, now_ms};
use crate::DomainResult;

const PROVISION_RETRIES_TOTAL: &str = "maplewire_room_provision_retries_total";

/// Durable two-party conversation channel. Created only as a side effect of
/// an accepted connection request, never deleted by this subsystem, never
/// re-parented to a different request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRoom {
    pub room_id: String,
    pub business_id: String,
    pub owner_id: String,
    pub member_id: String,
    pub connection_request_id: String,
    pub created_at_ms: i64,
    pub last_message_at_ms: Option<i64>,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.member_id == user_id
    }

    /// The participant on the other side of the conversation.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.owner_id == user_id {
            Some(self.member_id.as_str())
        } else if self.member_id == user_id {
            Some(self.owner_id.as_str())
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProvisionInput {
    pub business_id: String,
    pub owner_id: String,
    pub member_id: String,
    pub connection_request_id: String,
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
        }
    }
}

/// Guarantees at most one room per `(business_id, member_id)` pair.
/// Provisioning inserts first and treats a uniqueness violation as "room
/// already exists, fetch and return it", so repeated and concurrent accept
/// attempts converge on one room id.
#[derive(Clone)]
pub struct RoomProvisioner {
    rooms: Arc<dyn ChatRoomRepository>,
    retry: RetryPolicy,
}

impl RoomProvisioner {
    pub fn new(rooms: Arc<dyn ChatRoomRepository>) -> Self {
        Self::with_retry(rooms, RetryPolicy::default())
    }

    pub fn with_retry(rooms: Arc<dyn ChatRoomRepository>, retry: RetryPolicy) -> Self {
        Self { rooms, retry }
    }

    pub async fn provision(&self, input: ProvisionInput) -> DomainResult<ChatRoom> {
        let input = validate_provision_input(input)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_provision(&input).await {
                Ok(room) => return Ok(room),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    counter!(PROVISION_RETRIES_TOTAL).increment(1);
                    let delay = backoff_ms(self.retry.backoff_base_ms, attempt, self.retry.backoff_max_ms);
                    tracing::warn!(
                        business_id = %input.business_id,
                        member_id = %input.member_id,
                        attempt,
                        delay_ms = delay,
                        error = %err,
                        "room provisioning retry"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(DomainError::ProvisioningFailed(format!(
                        "retries exhausted after {attempt} attempts: {err}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_provision(&self, input: &ProvisionInput) -> DomainResult<ChatRoom> {
        let room = ChatRoom {
            room_id: crate::util::uuid_v7_without_dashes(),
            business_id: input.business_id.clone(),
            owner_id: input.owner_id.clone(),
            member_id: input.member_id.clone(),
            connection_request_id: input.connection_request_id.clone(),
            created_at_ms: now_ms(),
            last_message_at_ms: None,
        };
        match self.rooms.create(&room).await {
            Ok(room) => Ok(room),
            Err(DomainError::Conflict) => self
                .rooms
                .find_by_pair(&input.business_id, &input.member_id)
                .await?
                .ok_or(DomainError::Conflict),
            Err(err) => Err(err),
        }
    }

    pub async fn find_room(
        &self,
        business_id: &str,
        member_id: &str,
    ) -> DomainResult<Option<ChatRoom>> {
        self.rooms.find_by_pair(business_id, member_id).await
    }

    pub async fn get_room(&self, actor: &ActorIdentity, room_id: &str) -> DomainResult<ChatRoom> {
        let room = self.rooms.get(room_id).await?.ok_or(DomainError::NotFound)?;
        if !room.has_participant(&actor.user_id) {
            // Rooms outside the caller's permission scope do not resolve.
            return Err(DomainError::NotFound);
        }
        Ok(room)
    }

    /// Conversations the actor participates in, most recent activity first.
    pub async fn list_rooms(&self, actor: &ActorIdentity) -> DomainResult<Vec<ChatRoom>> {
        self.rooms.list_for_user(&actor.user_id).await
    }
}

fn validate_provision_input(mut input: ProvisionInput) -> DomainResult<ProvisionInput> {
    input.business_id = input.business_id.trim().to_string();
    input.owner_id = input.owner_id.trim().to_string();
    input.member_id = input.member_id.trim().to_string();
    input.connection_request_id = input.connection_request_id.trim().to_string();

    if input.business_id.is_empty()
        || input.owner_id.is_empty()
        || input.member_id.is_empty()
        || input.connection_request_id.is_empty()
    {
        return Err(DomainError::Validation(
            "provisioning fields cannot be empty".into(),
        ));
    }
    if input.owner_id == input.member_id {
        return Err(DomainError::Validation(
            "room owner and member must differ".into(),
        ));
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct MockRoomRepo {
        rooms: Arc<RwLock<HashMap<String, ChatRoom>>>,
        fail_creates: AtomicU32,
    }

    impl MockRoomRepo {
        fn failing_first(count: u32) -> Self {
            let repo = Self::default();
            repo.fail_creates.store(count, Ordering::SeqCst);
            repo
        }
    }

    impl ChatRoomRepository for MockRoomRepo {
        fn create(&self, room: &ChatRoom) -> BoxFuture<'_, DomainResult<ChatRoom>> {
            let room = room.clone();
            let rooms = self.rooms.clone();
            let remaining = self.fail_creates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_creates.store(remaining - 1, Ordering::SeqCst);
                return Box::pin(async move {
                    Err(DomainError::TransientStore("store unavailable".into()))
                });
            }
            Box::pin(async move {
                let mut rooms = rooms.write().await;
                let duplicate = rooms
                    .values()
                    .any(|r| r.business_id == room.business_id && r.member_id == room.member_id);
                if duplicate {
                    return Err(DomainError::Conflict);
                }
                rooms.insert(room.room_id.clone(), room.clone());
                Ok(room)
            })
        }

        fn get(&self, room_id: &str) -> BoxFuture<'_, DomainResult<Option<ChatRoom>>> {
            let room_id = room_id.to_string();
            let rooms = self.rooms.clone();
            Box::pin(async move { Ok(rooms.read().await.get(&room_id).cloned()) })
        }

        fn find_by_pair(
            &self,
            business_id: &str,
            member_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<ChatRoom>>> {
            let business_id = business_id.to_string();
            let member_id = member_id.to_string();
            let rooms = self.rooms.clone();
            Box::pin(async move {
                let rooms = rooms.read().await;
                Ok(rooms
                    .values()
                    .find(|r| r.business_id == business_id && r.member_id == member_id)
                    .cloned())
            })
        }

        fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<ChatRoom>>> {
            let user_id = user_id.to_string();
            let rooms = self.rooms.clone();
            Box::pin(async move {
                let mut out: Vec<_> = rooms
                    .read()
                    .await
                    .values()
                    .filter(|r| r.has_participant(&user_id))
                    .cloned()
                    .collect();
                out.sort_by(|a, b| {
                    b.last_message_at_ms
                        .unwrap_or(b.created_at_ms)
                        .cmp(&a.last_message_at_ms.unwrap_or(a.created_at_ms))
                });
                Ok(out)
            })
        }

        fn touch_last_message(
            &self,
            room_id: &str,
            at_ms: i64,
        ) -> BoxFuture<'_, DomainResult<()>> {
            let room_id = room_id.to_string();
            let rooms = self.rooms.clone();
            Box::pin(async move {
                let mut rooms = rooms.write().await;
                let room = rooms.get_mut(&room_id).ok_or(DomainError::NotFound)?;
                room.last_message_at_ms = Some(at_ms);
                Ok(())
            })
        }
    }

    fn input() -> ProvisionInput {
        ProvisionInput {
            business_id: "biz-1".into(),
            owner_id: "owner-1".into(),
            member_id: "member-1".into(),
            connection_request_id: "req-1".into(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
        }
    }

    #[tokio::test]
    async fn repeated_provision_returns_same_room() {
        let provisioner = RoomProvisioner::new(Arc::new(MockRoomRepo::default()));
        let first = provisioner.provision(input()).await.expect("first");
        let second = provisioner.provision(input()).await.expect("second");
        assert_eq!(first.room_id, second.room_id);
        assert_eq!(first.connection_request_id, "req-1");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let repo = Arc::new(MockRoomRepo::failing_first(2));
        let provisioner = RoomProvisioner::with_retry(repo, fast_retry());
        let room = provisioner.provision(input()).await.expect("room");
        assert_eq!(room.business_id, "biz-1");
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_provisioning_failed() {
        let repo = Arc::new(MockRoomRepo::failing_first(10));
        let provisioner = RoomProvisioner::with_retry(repo, fast_retry());
        let err = provisioner.provision(input()).await.unwrap_err();
        assert!(matches!(err, DomainError::ProvisioningFailed(_)));
    }

    #[tokio::test]
    async fn get_room_outside_scope_is_not_found() {
        let provisioner = RoomProvisioner::new(Arc::new(MockRoomRepo::default()));
        let room = provisioner.provision(input()).await.expect("room");
        let stranger = ActorIdentity::with_user_id("someone-else");
        let err = provisioner
            .get_room(&stranger, &room.room_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn provision_input_rejects_self_pair() {
        let err = validate_provision_input(ProvisionInput {
            business_id: "biz-1".into(),
            owner_id: "u-1".into(),
            member_id: "u-1".into(),
            connection_request_id: "req-1".into(),
        })
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
