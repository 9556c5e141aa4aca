use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{NotificationInput, NotificationKind, NotificationService};
use crate::ports::business::BusinessDirectory;
use crate::ports::connections::ConnectionRequestRepository;
use crate::rooms::{ProvisionInput, RoomProvisioner};
use crate::util::now_ms;
use crate::DomainResult;

const MAX_MESSAGE_LENGTH: usize = 1_000;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A member's ask to open a conversation with a business. Only the business
/// owner decides it, and a decision is terminal: accepted requests anchor a
/// chat room, rejected requests are notified and then removed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub request_id: String,
    pub business_id: String,
    /// Snapshot at request time; later renames do not rewrite history.
    pub business_name: String,
    pub owner_id: String,
    pub requester_id: String,
    pub requester_username: String,
    pub message: Option<String>,
    pub status: ConnectionStatus,
    pub created_at_ms: i64,
    pub decided_at_ms: Option<i64>,
    pub client_request_id: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug)]
pub struct ConnectionRequestInput {
    pub business_id: String,
    pub message: Option<String>,
    pub client_request_id: String,
    pub correlation_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// What a decision produced: the decided request plus the room id when the
/// decision was an accept.
#[derive(Clone, Debug)]
pub struct DecisionOutcome {
    pub request: ConnectionRequest,
    pub room_id: Option<String>,
}

#[derive(Clone)]
pub struct ConnectionService {
    requests: Arc<dyn ConnectionRequestRepository>,
    directory: Arc<dyn BusinessDirectory>,
    provisioner: RoomProvisioner,
    notifications: NotificationService,
}

impl ConnectionService {
    pub fn new(
        requests: Arc<dyn ConnectionRequestRepository>,
        directory: Arc<dyn BusinessDirectory>,
        provisioner: RoomProvisioner,
        notifications: NotificationService,
    ) -> Self {
        Self {
            requests,
            directory,
            provisioner,
            notifications,
        }
    }

    /// Submit a connection request to a business. Resubmitting with the same
    /// client request id replays the stored row.
    pub async fn request_connection(
        &self,
        actor: &ActorIdentity,
        input: ConnectionRequestInput,
    ) -> DomainResult<ConnectionRequest> {
        let input = validate_connection_input(input)?;
        let business = self
            .directory
            .get_business(&input.business_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if business.owner_id == actor.user_id {
            return Err(DomainError::SelfConnection);
        }

        if let Some(existing) = self
            .requests
            .get_by_client_request(&actor.user_id, &input.client_request_id)
            .await?
        {
            return Ok(existing);
        }

        let request = ConnectionRequest {
            request_id: crate::util::uuid_v7_without_dashes(),
            business_id: business.business_id.clone(),
            business_name: business.name.clone(),
            owner_id: business.owner_id.clone(),
            requester_id: actor.user_id.clone(),
            requester_username: actor.username.clone(),
            message: input.message,
            status: ConnectionStatus::Pending,
            created_at_ms: now_ms(),
            decided_at_ms: None,
            client_request_id: input.client_request_id.clone(),
            correlation_id: input.correlation_id,
        };

        match self.requests.create(&request).await {
            Ok(stored) => {
                tracing::info!(
                    request_id = %stored.request_id,
                    business_id = %stored.business_id,
                    requester_id = %stored.requester_id,
                    correlation_id = %stored.correlation_id,
                    "connection request created"
                );
                Ok(stored)
            }
            Err(DomainError::Conflict) => self
                .requests
                .get_by_client_request(&actor.user_id, &input.client_request_id)
                .await?
                .ok_or(DomainError::Conflict),
            Err(err) => Err(err),
        }
    }

    /// Decide a pending request. The status flip is a compare-and-set, so of
    /// two racing decisions exactly one wins; the loser sees `InvalidState`.
    /// Side effects run after the flip and can be resumed through
    /// [`retry_provisioning`](Self::retry_provisioning) if they fail.
    pub async fn decide(
        &self,
        actor: &ActorIdentity,
        request_id: &str,
        decision: Decision,
    ) -> DomainResult<DecisionOutcome> {
        let request = self.owned_request(actor, request_id).await?;
        if request.status != ConnectionStatus::Pending {
            return Err(DomainError::InvalidState(format!(
                "request is already {}",
                status_label(request.status)
            )));
        }

        let to = match decision {
            Decision::Accept => ConnectionStatus::Accepted,
            Decision::Reject => ConnectionStatus::Rejected,
        };
        let decided = match self
            .requests
            .transition(request_id, ConnectionStatus::Pending, to, now_ms())
            .await
        {
            Ok(decided) => decided,
            Err(DomainError::Conflict) => {
                return Err(DomainError::InvalidState(
                    "request is no longer pending".into(),
                ));
            }
            Err(err) => return Err(err),
        };
        tracing::info!(
            request_id = %decided.request_id,
            business_id = %decided.business_id,
            status = status_label(decided.status),
            correlation_id = %decided.correlation_id,
            "connection request decided"
        );

        match decision {
            Decision::Accept => self.complete_accept(decided).await,
            Decision::Reject => self.complete_reject(decided).await,
        }
    }

    /// Resume the side effects of a committed decision after a provisioning
    /// or delivery failure. Every step replays idempotently, so calling this
    /// on an already-completed decision is harmless.
    pub async fn retry_provisioning(
        &self,
        actor: &ActorIdentity,
        request_id: &str,
    ) -> DomainResult<DecisionOutcome> {
        let request = self.owned_request(actor, request_id).await?;
        match request.status {
            ConnectionStatus::Pending => Err(DomainError::InvalidState(
                "request has not been decided".into(),
            )),
            ConnectionStatus::Accepted => self.complete_accept(request).await,
            ConnectionStatus::Rejected => self.complete_reject(request).await,
        }
    }

    /// The owner's inbox: undecided requests across all their businesses.
    pub async fn list_received(
        &self,
        actor: &ActorIdentity,
    ) -> DomainResult<Vec<ConnectionRequest>> {
        let mut rows = self.requests.list_by_owner(&actor.user_id).await?;
        rows.retain(|row| row.status == ConnectionStatus::Pending);
        rows.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.request_id.cmp(&a.request_id))
        });
        Ok(rows)
    }

    pub async fn list_sent(&self, actor: &ActorIdentity) -> DomainResult<Vec<ConnectionRequest>> {
        let mut rows = self.requests.list_by_requester(&actor.user_id).await?;
        rows.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.request_id.cmp(&a.request_id))
        });
        Ok(rows)
    }

    async fn owned_request(
        &self,
        actor: &ActorIdentity,
        request_id: &str,
    ) -> DomainResult<ConnectionRequest> {
        self.requests
            .get(request_id)
            .await?
            .filter(|request| request.owner_id == actor.user_id)
            .ok_or(DomainError::NotFound)
    }

    async fn complete_accept(&self, request: ConnectionRequest) -> DomainResult<DecisionOutcome> {
        let room = self
            .provisioner
            .provision(ProvisionInput {
                business_id: request.business_id.clone(),
                owner_id: request.owner_id.clone(),
                member_id: request.requester_id.clone(),
                connection_request_id: request.request_id.clone(),
            })
            .await?;

        self.notify_requester(&request, Decision::Accept).await?;
        Ok(DecisionOutcome {
            request,
            room_id: Some(room.room_id),
        })
    }

    async fn complete_reject(&self, request: ConnectionRequest) -> DomainResult<DecisionOutcome> {
        // Notify before deleting so a crash in between leaves a retryable
        // rejected row, never a silent disappearance.
        self.notify_requester(&request, Decision::Reject).await?;
        self.requests.delete(&request.request_id).await?;
        Ok(DecisionOutcome {
            request,
            room_id: None,
        })
    }

    async fn notify_requester(
        &self,
        request: &ConnectionRequest,
        decision: Decision,
    ) -> DomainResult<()> {
        let (title, body, kind, tag) = match decision {
            Decision::Accept => (
                "Connection accepted".to_string(),
                format!(
                    "{} accepted your connection request. You can now chat.",
                    request.business_name
                ),
                NotificationKind::ConnectionRequestAccepted {
                    business_id: request.business_id.clone(),
                    business_name: request.business_name.clone(),
                    request_id: request.request_id.clone(),
                },
                "connection_request_accepted",
            ),
            Decision::Reject => (
                "Connection declined".to_string(),
                format!("{} declined your connection request.", request.business_name),
                NotificationKind::ConnectionRequestDeclined {
                    business_id: request.business_id.clone(),
                    business_name: request.business_name.clone(),
                    request_id: request.request_id.clone(),
                },
                "connection_request_declined",
            ),
        };
        self.notifications
            .emit(NotificationInput {
                recipient_id: request.requester_id.clone(),
                title,
                body,
                kind,
                dedupe_key: Some(format!("{tag}:{}", request.request_id)),
                client_request_id: request.client_request_id.clone(),
                correlation_id: request.correlation_id.clone(),
            })
            .await?;
        Ok(())
    }
}

fn status_label(status: ConnectionStatus) -> &'static str {
    match status {
        ConnectionStatus::Pending => "pending",
        ConnectionStatus::Accepted => "accepted",
        ConnectionStatus::Rejected => "rejected",
    }
}

fn validate_connection_input(
    mut input: ConnectionRequestInput,
) -> DomainResult<ConnectionRequestInput> {
    input.business_id = input.business_id.trim().to_string();
    if input.business_id.is_empty() {
        return Err(DomainError::Validation("business_id is required".into()));
    }
    if input.client_request_id.trim().is_empty() {
        return Err(DomainError::Validation(
            "client_request_id is required".into(),
        ));
    }
    input.message = match input.message {
        Some(message) => {
            let message = message.trim().to_string();
            if message.chars().count() > MAX_MESSAGE_LENGTH {
                return Err(DomainError::Validation(format!(
                    "message exceeds max length of {MAX_MESSAGE_LENGTH}"
                )));
            }
            (!message.is_empty()).then_some(message)
        }
        None => None,
    };
    Ok(input)
}
