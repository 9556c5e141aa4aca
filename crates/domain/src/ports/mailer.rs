use serde::{Deserialize, Serialize};

use crate::DomainResult;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub recipient_id: String,
    pub subject: String,
    pub body: String,
}

/// Fire-and-forget mail relay. A failed send never rolls back the state
/// transition that triggered it.
pub trait MailSink: Send + Sync {
    fn send(&self, email: &OutboundEmail) -> crate::ports::BoxFuture<'_, DomainResult<()>>;
}
