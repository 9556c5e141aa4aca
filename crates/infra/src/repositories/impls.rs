use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use maplewire_domain::business::BusinessRecord;
use maplewire_domain::connections::{ConnectionRequest, ConnectionStatus};
use maplewire_domain::error::DomainError;
use maplewire_domain::messages::ChatMessage;
use maplewire_domain::notifications::{Notification, NotificationKind};
use maplewire_domain::ports::business::BusinessDirectory;
use maplewire_domain::ports::connections::ConnectionRequestRepository;
use maplewire_domain::ports::messages::ChatMessageRepository;
use maplewire_domain::ports::notifications::NotificationRepository;
use maplewire_domain::ports::rooms::ChatRoomRepository;
use maplewire_domain::ports::BoxFuture;
use maplewire_domain::rooms::ChatRoom;
use maplewire_domain::DomainResult;

fn composite_key(left: &str, right: &str) -> String {
    format!("{left}\u{1f}{right}")
}

// Every repository that keeps a secondary index acquires the index lock
// before the row store, in every method that holds both.

#[derive(Default)]
pub struct InMemoryBusinessDirectory {
    store: Arc<RwLock<HashMap<String, BusinessRecord>>>,
}

impl InMemoryBusinessDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, business: BusinessRecord) {
        self.store
            .write()
            .await
            .insert(business.business_id.clone(), business);
    }
}

impl BusinessDirectory for InMemoryBusinessDirectory {
    fn get_business(
        &self,
        business_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<BusinessRecord>>> {
        let business_id = business_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&business_id).cloned()) })
    }
}

#[derive(Default)]
pub struct InMemoryConnectionRequestRepository {
    store: Arc<RwLock<HashMap<String, ConnectionRequest>>>,
    // (requester_id, client_request_id) -> request_id
    by_client: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryConnectionRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRequestRepository for InMemoryConnectionRequestRepository {
    fn create(&self, request: &ConnectionRequest) -> BoxFuture<'_, DomainResult<ConnectionRequest>> {
        let request = request.clone();
        let store = self.store.clone();
        let by_client = self.by_client.clone();
        Box::pin(async move {
            let key = composite_key(&request.requester_id, &request.client_request_id);
            let mut by_client = by_client.write().await;
            if by_client.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            by_client.insert(key, request.request_id.clone());
            store
                .write()
                .await
                .insert(request.request_id.clone(), request.clone());
            Ok(request)
        })
    }

    fn get(&self, request_id: &str) -> BoxFuture<'_, DomainResult<Option<ConnectionRequest>>> {
        let request_id = request_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&request_id).cloned()) })
    }

    fn get_by_client_request(
        &self,
        requester_id: &str,
        client_request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ConnectionRequest>>> {
        let key = composite_key(requester_id, client_request_id);
        let store = self.store.clone();
        let by_client = self.by_client.clone();
        Box::pin(async move {
            let by_client = by_client.read().await;
            let Some(request_id) = by_client.get(&key) else {
                return Ok(None);
            };
            Ok(store.read().await.get(request_id).cloned())
        })
    }

    fn transition(
        &self,
        request_id: &str,
        from: ConnectionStatus,
        to: ConnectionStatus,
        decided_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<ConnectionRequest>> {
        let request_id = request_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let request = store.get_mut(&request_id).ok_or(DomainError::NotFound)?;
            if request.status != from {
                return Err(DomainError::Conflict);
            }
            request.status = to;
            request.decided_at_ms = Some(decided_at_ms);
            Ok(request.clone())
        })
    }

    fn delete(&self, request_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let request_id = request_id.to_string();
        let store = self.store.clone();
        let by_client = self.by_client.clone();
        Box::pin(async move {
            let mut by_client = by_client.write().await;
            let mut store = store.write().await;
            let request = store.remove(&request_id).ok_or(DomainError::NotFound)?;
            by_client.remove(&composite_key(&request.requester_id, &request.client_request_id));
            Ok(())
        })
    }

    fn list_by_owner(&self, owner_id: &str) -> BoxFuture<'_, DomainResult<Vec<ConnectionRequest>>> {
        let owner_id = owner_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|request| request.owner_id == owner_id)
                .cloned()
                .collect())
        })
    }

    fn list_by_requester(
        &self,
        requester_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<ConnectionRequest>>> {
        let requester_id = requester_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|request| request.requester_id == requester_id)
                .cloned()
                .collect())
        })
    }
}

#[derive(Default)]
pub struct InMemoryChatRoomRepository {
    store: Arc<RwLock<HashMap<String, ChatRoom>>>,
    // (business_id, member_id) -> room_id, the uniqueness the provisioner
    // leans on.
    by_pair: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryChatRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatRoomRepository for InMemoryChatRoomRepository {
    fn create(&self, room: &ChatRoom) -> BoxFuture<'_, DomainResult<ChatRoom>> {
        let room = room.clone();
        let store = self.store.clone();
        let by_pair = self.by_pair.clone();
        Box::pin(async move {
            let key = composite_key(&room.business_id, &room.member_id);
            let mut by_pair = by_pair.write().await;
            if by_pair.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            by_pair.insert(key, room.room_id.clone());
            store.write().await.insert(room.room_id.clone(), room.clone());
            Ok(room)
        })
    }

    fn get(&self, room_id: &str) -> BoxFuture<'_, DomainResult<Option<ChatRoom>>> {
        let room_id = room_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&room_id).cloned()) })
    }

    fn find_by_pair(
        &self,
        business_id: &str,
        member_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ChatRoom>>> {
        let key = composite_key(business_id, member_id);
        let store = self.store.clone();
        let by_pair = self.by_pair.clone();
        Box::pin(async move {
            let by_pair = by_pair.read().await;
            let Some(room_id) = by_pair.get(&key) else {
                return Ok(None);
            };
            Ok(store.read().await.get(room_id).cloned())
        })
    }

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<ChatRoom>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut rooms: Vec<_> = store
                .read()
                .await
                .values()
                .filter(|room| room.has_participant(&user_id))
                .cloned()
                .collect();
            // Most recently active conversation first.
            rooms.sort_by(|left, right| {
                right
                    .last_message_at_ms
                    .unwrap_or(right.created_at_ms)
                    .cmp(&left.last_message_at_ms.unwrap_or(left.created_at_ms))
                    .then_with(|| right.room_id.cmp(&left.room_id))
            });
            Ok(rooms)
        })
    }

    fn touch_last_message(&self, room_id: &str, at_ms: i64) -> BoxFuture<'_, DomainResult<()>> {
        let room_id = room_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let room = store.get_mut(&room_id).ok_or(DomainError::NotFound)?;
            if room.last_message_at_ms.unwrap_or(i64::MIN) < at_ms {
                room.last_message_at_ms = Some(at_ms);
            }
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct InMemoryChatMessageRepository {
    store: Arc<RwLock<HashMap<String, ChatMessage>>>,
    // (room_id, client_request_id) -> message_id
    by_client: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryChatMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatMessageRepository for InMemoryChatMessageRepository {
    fn create(&self, message: &ChatMessage) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let message = message.clone();
        let store = self.store.clone();
        let by_client = self.by_client.clone();
        Box::pin(async move {
            let key = composite_key(&message.room_id, &message.client_request_id);
            let mut by_client = by_client.write().await;
            if by_client.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            by_client.insert(key, message.message_id.clone());
            store
                .write()
                .await
                .insert(message.message_id.clone(), message.clone());
            Ok(message)
        })
    }

    fn get_by_client_request(
        &self,
        room_id: &str,
        client_request_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ChatMessage>>> {
        let key = composite_key(room_id, client_request_id);
        let store = self.store.clone();
        let by_client = self.by_client.clone();
        Box::pin(async move {
            let by_client = by_client.read().await;
            let Some(message_id) = by_client.get(&key) else {
                return Ok(None);
            };
            Ok(store.read().await.get(message_id).cloned())
        })
    }

    fn list_by_room(&self, room_id: &str) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
        let room_id = room_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut messages: Vec<_> = store
                .read()
                .await
                .values()
                .filter(|message| message.room_id == room_id)
                .cloned()
                .collect();
            messages.sort_by(|left, right| {
                left.created_at_ms
                    .cmp(&right.created_at_ms)
                    .then_with(|| left.message_id.cmp(&right.message_id))
            });
            Ok(messages)
        })
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    store: Arc<RwLock<HashMap<String, Notification>>>,
    // (user_id, dedupe_key) -> notification_id
    by_dedupe: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationRepository for InMemoryNotificationRepository {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification = notification.clone();
        let store = self.store.clone();
        let by_dedupe = self.by_dedupe.clone();
        Box::pin(async move {
            let key = composite_key(&notification.user_id, &notification.dedupe_key);
            let mut by_dedupe = by_dedupe.write().await;
            if by_dedupe.contains_key(&key) {
                return Err(DomainError::Conflict);
            }
            by_dedupe.insert(key, notification.notification_id.clone());
            store
                .write()
                .await
                .insert(notification.notification_id.clone(), notification.clone());
            Ok(notification)
        })
    }

    fn get(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Notification>>> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .get(&notification_id)
                .filter(|notification| notification.user_id == user_id)
                .cloned())
        })
    }

    fn get_by_dedupe_key(
        &self,
        user_id: &str,
        dedupe_key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Notification>>> {
        let key = composite_key(user_id, dedupe_key);
        let store = self.store.clone();
        let by_dedupe = self.by_dedupe.clone();
        Box::pin(async move {
            let by_dedupe = by_dedupe.read().await;
            let Some(notification_id) = by_dedupe.get(&key) else {
                return Ok(None);
            };
            Ok(store.read().await.get(notification_id).cloned())
        })
    }

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut notifications: Vec<_> = store
                .read()
                .await
                .values()
                .filter(|notification| notification.user_id == user_id)
                .cloned()
                .collect();
            notifications.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.notification_id.cmp(&left.notification_id))
            });
            Ok(notifications)
        })
    }

    fn set_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let notification = store
                .get_mut(&notification_id)
                .filter(|notification| notification.user_id == user_id)
                .ok_or(DomainError::NotFound)?;
            notification.read = read;
            Ok(notification.clone())
        })
    }

    fn set_emailed(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let notification = store
                .get_mut(&notification_id)
                .filter(|notification| notification.user_id == user_id)
                .ok_or(DomainError::NotFound)?;
            notification.emailed = true;
            Ok(())
        })
    }

    fn delete(&self, user_id: &str, notification_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let user_id = user_id.to_string();
        let notification_id = notification_id.to_string();
        let store = self.store.clone();
        let by_dedupe = self.by_dedupe.clone();
        Box::pin(async move {
            let mut by_dedupe = by_dedupe.write().await;
            let mut store = store.write().await;
            match store.get(&notification_id) {
                Some(notification) if notification.user_id == user_id => {
                    let key = composite_key(&notification.user_id, &notification.dedupe_key);
                    by_dedupe.remove(&key);
                    store.remove(&notification_id);
                    Ok(())
                }
                _ => Err(DomainError::NotFound),
            }
        })
    }

    fn list_chat_group(
        &self,
        user_id: &str,
        sender_id: &str,
        room_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let user_id = user_id.to_string();
        let sender_id = sender_id.to_string();
        let room_id = room_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            Ok(store
                .read()
                .await
                .values()
                .filter(|notification| {
                    notification.user_id == user_id
                        && matches!(
                            &notification.kind,
                            NotificationKind::ChatMessage {
                                room_id: event_room,
                                sender_id: event_sender,
                                ..
                            } if *event_room == room_id && *event_sender == sender_id
                        )
                })
                .cloned()
                .collect())
        })
    }
}
