use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::mailer::{MailSink, OutboundEmail};
use crate::ports::notifications::NotificationRepository;
use crate::ports::realtime::{ChannelKey, RealtimeBus, RowEvent, RowOperation};
use crate::util::now_ms;
use crate::DomainResult;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_BODY_LENGTH: usize = 1_000;

/// One payload shape per notification type. The wire form is
/// `{"type": "...", "data": {...}}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NotificationKind {
    ConnectionRequestAccepted {
        business_id: String,
        business_name: String,
        request_id: String,
    },
    ConnectionRequestDeclined {
        business_id: String,
        business_name: String,
        request_id: String,
    },
    ChatMessage {
        room_id: String,
        sender_id: String,
        sender_username: String,
        preview: String,
    },
    ListingApproved {
        business_id: String,
    },
    ListingRejected {
        business_id: String,
        reason: String,
    },
    ReportCleared {
        report_id: String,
    },
    OfferAccepted {
        offer_id: String,
        business_id: String,
    },
    OfferDeclined {
        offer_id: String,
        business_id: String,
    },
}

impl NotificationKind {
    pub fn type_tag(&self) -> &'static str {
        match self {
            NotificationKind::ConnectionRequestAccepted { .. } => "connection_request_accepted",
            NotificationKind::ConnectionRequestDeclined { .. } => "connection_request_declined",
            NotificationKind::ChatMessage { .. } => "chat_message",
            NotificationKind::ListingApproved { .. } => "listing_approved",
            NotificationKind::ListingRejected { .. } => "listing_rejected",
            NotificationKind::ReportCleared { .. } => "report_cleared",
            NotificationKind::OfferAccepted { .. } => "offer_accepted",
            NotificationKind::OfferDeclined { .. } => "offer_declined",
        }
    }

    /// Chat notifications collapse into per-conversation groups; every other
    /// kind passes through the feed individually.
    pub fn chat_group_key(&self) -> Option<GroupKey> {
        match self {
            NotificationKind::ChatMessage {
                room_id, sender_id, ..
            } => Some(GroupKey {
                sender_id: sender_id.clone(),
                room_id: room_id.clone(),
            }),
            _ => None,
        }
    }

    /// Decision notifications also go out by email; the rest stay in-app.
    fn email_worthy(&self) -> bool {
        matches!(
            self,
            NotificationKind::ConnectionRequestAccepted { .. }
                | NotificationKind::ConnectionRequestDeclined { .. }
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub read: bool,
    pub emailed: bool,
    pub created_at_ms: i64,
    pub dedupe_key: String,
    pub client_request_id: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
pub struct NotificationInput {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    /// Exactly one notification exists per side-effecting event; events that
    /// can be replayed supply a stable dedupe key. Defaults to
    /// `<type>:<client_request_id>`.
    pub dedupe_key: Option<String>,
    pub client_request_id: String,
    pub correlation_id: String,
}

#[derive(Clone)]
pub struct NotificationService {
    repository: Arc<dyn NotificationRepository>,
    bus: Arc<dyn RealtimeBus>,
    mailer: Option<Arc<dyn MailSink>>,
}

impl NotificationService {
    pub fn new(repository: Arc<dyn NotificationRepository>, bus: Arc<dyn RealtimeBus>) -> Self {
        Self {
            repository,
            bus,
            mailer: None,
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn MailSink>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Persist and fan out one notification. A dedupe-key conflict replays
    /// the stored row instead of inserting twice. Email delivery is
    /// fire-and-forget: its failure never rolls back the insert.
    pub async fn emit(&self, input: NotificationInput) -> DomainResult<Notification> {
        let input = validate_notification_input(input)?;
        let dedupe_key = input.dedupe_key.clone().unwrap_or_else(|| {
            format!("{}:{}", input.kind.type_tag(), input.client_request_id)
        });
        let notification = Notification {
            notification_id: crate::util::uuid_v7_without_dashes(),
            user_id: input.recipient_id,
            title: input.title,
            body: input.body,
            kind: input.kind,
            read: false,
            emailed: false,
            created_at_ms: now_ms(),
            dedupe_key,
            client_request_id: input.client_request_id,
            correlation_id: input.correlation_id,
        };

        let stored = match self.repository.create(&notification).await {
            Ok(stored) => stored,
            Err(DomainError::Conflict) => {
                return self
                    .repository
                    .get_by_dedupe_key(&notification.user_id, &notification.dedupe_key)
                    .await?
                    .ok_or(DomainError::Conflict);
            }
            Err(err) => {
                return Err(DomainError::Delivery(format!(
                    "notification insert failed: {err}"
                )));
            }
        };

        self.publish(&stored, RowOperation::Insert).await;
        self.send_email(&stored).await;
        Ok(stored)
    }

    pub async fn list(&self, actor: &ActorIdentity) -> DomainResult<Vec<Notification>> {
        self.repository.list_for_user(&actor.user_id).await
    }

    pub async fn unread_count(&self, actor: &ActorIdentity) -> DomainResult<usize> {
        let rows = self.repository.list_for_user(&actor.user_id).await?;
        Ok(rows.iter().filter(|row| !row.read).count())
    }

    pub async fn mark_read(
        &self,
        actor: &ActorIdentity,
        notification_id: &str,
    ) -> DomainResult<Notification> {
        self.toggle_read(actor, notification_id, true).await
    }

    pub async fn mark_unread(
        &self,
        actor: &ActorIdentity,
        notification_id: &str,
    ) -> DomainResult<Notification> {
        self.toggle_read(actor, notification_id, false).await
    }

    async fn toggle_read(
        &self,
        actor: &ActorIdentity,
        notification_id: &str,
        read: bool,
    ) -> DomainResult<Notification> {
        let updated = self
            .repository
            .set_read(&actor.user_id, notification_id, read)
            .await?;
        self.publish(&updated, RowOperation::Update).await;
        Ok(updated)
    }

    /// Batch-read of every chat notification in a room, triggered when the
    /// recipient navigates into the conversation.
    pub async fn mark_room_read(
        &self,
        actor: &ActorIdentity,
        room_id: &str,
    ) -> DomainResult<usize> {
        let rows = self.repository.list_for_user(&actor.user_id).await?;
        let mut marked = 0usize;
        for row in rows {
            let in_room = matches!(
                &row.kind,
                NotificationKind::ChatMessage { room_id: r, .. } if r == room_id
            );
            if in_room && !row.read {
                let updated = self
                    .repository
                    .set_read(&actor.user_id, &row.notification_id, true)
                    .await?;
                self.publish(&updated, RowOperation::Update).await;
                marked += 1;
            }
        }
        Ok(marked)
    }

    pub async fn delete(&self, actor: &ActorIdentity, notification_id: &str) -> DomainResult<()> {
        let row = self
            .repository
            .get(&actor.user_id, notification_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        self.repository
            .delete(&actor.user_id, notification_id)
            .await?;
        self.publish(&row, RowOperation::Delete).await;
        Ok(())
    }

    /// "Delete all" on a chat group removes every underlying row, not just
    /// the representative.
    pub async fn delete_group(
        &self,
        actor: &ActorIdentity,
        sender_id: &str,
        room_id: &str,
    ) -> DomainResult<usize> {
        let rows = self
            .repository
            .list_chat_group(&actor.user_id, sender_id, room_id)
            .await?;
        let mut deleted = 0usize;
        for row in rows {
            self.repository
                .delete(&actor.user_id, &row.notification_id)
                .await?;
            self.publish(&row, RowOperation::Delete).await;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Live feed updates for the recipient. The returned handle must be
    /// closed when the notification panel goes away.
    pub async fn subscribe(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<crate::ports::realtime::RealtimeSubscription> {
        self.bus
            .subscribe(&ChannelKey::notifications_for(&actor.user_id))
            .await
    }

    async fn publish(&self, notification: &Notification, operation: RowOperation) {
        let event = match operation {
            RowOperation::Insert => RowEvent::insert(notification),
            RowOperation::Update => RowEvent::update(notification),
            RowOperation::Delete => RowEvent::delete(notification),
        };
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode notification row event");
                return;
            }
        };
        if let Err(err) = self
            .bus
            .publish(&ChannelKey::notifications_for(&notification.user_id), event)
            .await
        {
            // The row is durable; a live subscriber that missed the event
            // recovers on the next refetch.
            tracing::warn!(
                notification_id = %notification.notification_id,
                error = %err,
                "notification realtime publish failed"
            );
        }
    }

    async fn send_email(&self, notification: &Notification) {
        if !notification.kind.email_worthy() {
            return;
        }
        let Some(mailer) = self.mailer.as_ref() else {
            return;
        };
        let email = OutboundEmail {
            recipient_id: notification.user_id.clone(),
            subject: notification.title.clone(),
            body: notification.body.clone(),
        };
        match mailer.send(&email).await {
            Ok(()) => {
                if let Err(err) = self
                    .repository
                    .set_emailed(&notification.user_id, &notification.notification_id)
                    .await
                {
                    tracing::warn!(
                        notification_id = %notification.notification_id,
                        error = %err,
                        "failed to record emailed flag"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    notification_id = %notification.notification_id,
                    error = %err,
                    "notification email send failed"
                );
            }
        }
    }
}

fn validate_notification_input(mut input: NotificationInput) -> DomainResult<NotificationInput> {
    input.recipient_id = input.recipient_id.trim().to_string();
    input.title = input.title.trim().to_string();
    input.body = input.body.trim().to_string();

    if input.recipient_id.is_empty() {
        return Err(DomainError::Validation("recipient_id is required".into()));
    }
    if input.title.is_empty() {
        return Err(DomainError::Validation("title is required".into()));
    }
    if input.title.chars().count() > MAX_TITLE_LENGTH {
        return Err(DomainError::Validation(format!(
            "title exceeds max length of {MAX_TITLE_LENGTH}"
        )));
    }
    if input.body.chars().count() > MAX_BODY_LENGTH {
        return Err(DomainError::Validation(format!(
            "body exceeds max length of {MAX_BODY_LENGTH}"
        )));
    }
    Ok(input)
}

/// One feed entry per distinct conversation partner within a room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub sender_id: String,
    pub room_id: String,
}

#[derive(Clone, Debug, Default)]
struct ChatGroup {
    members: HashMap<String, Notification>,
}

impl ChatGroup {
    fn representative(&self) -> Option<&Notification> {
        self.members.values().max_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.notification_id.cmp(&b.notification_id))
        })
    }

    fn unread_members(&self) -> usize {
        self.members.values().filter(|n| !n.read).count()
    }
}

#[derive(Clone, Debug)]
pub struct ChatGroupSummary {
    pub key: GroupKey,
    pub representative: Notification,
    pub member_count: usize,
    pub unread_count: usize,
}

#[derive(Clone, Debug)]
pub enum FeedEntry {
    ChatGroup(ChatGroupSummary),
    Single(Notification),
}

impl FeedEntry {
    pub fn created_at_ms(&self) -> i64 {
        match self {
            FeedEntry::ChatGroup(group) => group.representative.created_at_ms,
            FeedEntry::Single(notification) => notification.created_at_ms,
        }
    }

    fn order_id(&self) -> &str {
        match self {
            FeedEntry::ChatGroup(group) => group.representative.notification_id.as_str(),
            FeedEntry::Single(notification) => notification.notification_id.as_str(),
        }
    }
}

/// Incrementally maintained aggregation of a recipient's notification log:
/// chat rows collapse into per-conversation groups, everything else stays a
/// single entry. Each realtime row event is merged in O(1) instead of
/// rebuilding the grouping from the flat list.
#[derive(Clone, Debug)]
pub struct NotificationFeed {
    user_id: String,
    chat_groups: HashMap<GroupKey, ChatGroup>,
    singles: HashMap<String, Notification>,
    location: HashMap<String, Option<GroupKey>>,
    unread: usize,
}

impl NotificationFeed {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            chat_groups: HashMap::new(),
            singles: HashMap::new(),
            location: HashMap::new(),
            unread: 0,
        }
    }

    /// Baseline from a full fetch; live events are layered on afterwards.
    pub fn from_rows(user_id: impl Into<String>, rows: Vec<Notification>) -> Self {
        let mut feed = Self::new(user_id);
        for row in rows {
            feed.apply_insert(row);
        }
        feed
    }

    /// Merge one realtime row event. Returns whether the feed changed;
    /// duplicate delivery of the same event is a no-op.
    pub fn apply_event(&mut self, event: &RowEvent) -> DomainResult<bool> {
        let row: Notification = serde_json::from_value(event.row.clone()).map_err(|err| {
            DomainError::Validation(format!("malformed notification row event: {err}"))
        })?;
        Ok(match event.operation {
            RowOperation::Insert => self.apply_insert(row),
            RowOperation::Update => self.apply_update(row),
            RowOperation::Delete => self.apply_delete(&row.notification_id),
        })
    }

    pub fn apply_insert(&mut self, row: Notification) -> bool {
        if row.user_id != self.user_id {
            return false;
        }
        if self.location.contains_key(&row.notification_id) {
            return false;
        }
        if !row.read {
            self.unread += 1;
        }
        match row.kind.chat_group_key() {
            Some(key) => {
                self.location
                    .insert(row.notification_id.clone(), Some(key.clone()));
                self.chat_groups
                    .entry(key)
                    .or_default()
                    .members
                    .insert(row.notification_id.clone(), row);
            }
            None => {
                self.location.insert(row.notification_id.clone(), None);
                self.singles.insert(row.notification_id.clone(), row);
            }
        }
        true
    }

    pub fn apply_update(&mut self, row: Notification) -> bool {
        let Some(slot) = self.location.get(&row.notification_id) else {
            // An update racing ahead of its insert is handled idempotently
            // by treating it as the insert.
            return self.apply_insert(row);
        };
        let existing = match slot {
            Some(key) => self
                .chat_groups
                .get_mut(key)
                .and_then(|group| group.members.get_mut(&row.notification_id)),
            None => self.singles.get_mut(&row.notification_id),
        };
        let Some(existing) = existing else {
            return false;
        };
        if *existing == row {
            return false;
        }
        match (existing.read, row.read) {
            (false, true) => self.unread = self.unread.saturating_sub(1),
            (true, false) => self.unread += 1,
            _ => {}
        }
        *existing = row;
        true
    }

    pub fn apply_delete(&mut self, notification_id: &str) -> bool {
        let Some(slot) = self.location.remove(notification_id) else {
            return false;
        };
        let removed = match slot {
            Some(key) => {
                let removed = self
                    .chat_groups
                    .get_mut(&key)
                    .and_then(|group| group.members.remove(notification_id));
                if self
                    .chat_groups
                    .get(&key)
                    .is_some_and(|group| group.members.is_empty())
                {
                    self.chat_groups.remove(&key);
                }
                removed
            }
            None => self.singles.remove(notification_id),
        };
        match removed {
            Some(row) => {
                if !row.read {
                    self.unread = self.unread.saturating_sub(1);
                }
                true
            }
            None => false,
        }
    }

    /// Rendered feed: grouped chat entries and single entries merged into
    /// one stream, representative created_at descending.
    pub fn entries(&self) -> Vec<FeedEntry> {
        let mut entries: Vec<FeedEntry> = Vec::with_capacity(self.chat_groups.len() + self.singles.len());
        for (key, group) in &self.chat_groups {
            if let Some(representative) = group.representative() {
                entries.push(FeedEntry::ChatGroup(ChatGroupSummary {
                    key: key.clone(),
                    representative: representative.clone(),
                    member_count: group.members.len(),
                    unread_count: group.unread_members(),
                }));
            }
        }
        entries.extend(self.singles.values().cloned().map(FeedEntry::Single));
        entries.sort_by(|a, b| {
            b.created_at_ms()
                .cmp(&a.created_at_ms())
                .then_with(|| b.order_id().cmp(a.order_id()))
        });
        entries
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn total_count(&self) -> usize {
        self.location.len()
    }

    /// Total chat rows across every group; equals the recipient's
    /// chat_message row count (grouping drops and double-counts nothing).
    pub fn chat_member_total(&self) -> usize {
        self.chat_groups
            .values()
            .map(|group| group.members.len())
            .sum()
    }

    pub fn group_member_ids(&self, key: &GroupKey) -> Vec<String> {
        self.chat_groups
            .get(key)
            .map(|group| group.members.keys().cloned().collect())
            .unwrap_or_default()
    }
}
