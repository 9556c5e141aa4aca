use crate::connections::{ConnectionRequest, ConnectionStatus};
use crate::DomainResult;

pub trait ConnectionRequestRepository: Send + Sync {
    /// Insert a new request. `Conflict` when the requester already submitted
    /// a request with the same client request id.
    fn create(
        &self,
        request: &ConnectionRequest,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ConnectionRequest>>;

    fn get(
        &self,
        request_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ConnectionRequest>>>;

    fn get_by_client_request(
        &self,
        requester_id: &str,
        client_request_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ConnectionRequest>>>;

    /// Compare-and-set status transition. `Conflict` when the stored status
    /// is not `from` anymore; the losing side of a decision race sees this.
    fn transition(
        &self,
        request_id: &str,
        from: ConnectionStatus,
        to: ConnectionStatus,
        decided_at_ms: i64,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ConnectionRequest>>;

    fn delete(&self, request_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<()>>;

    fn list_by_owner(
        &self,
        owner_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ConnectionRequest>>>;

    fn list_by_requester(
        &self,
        requester_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ConnectionRequest>>>;
}
