use std::time::Duration;

use reqwest::StatusCode;
use tokio::time::sleep;

use maplewire_domain::error::DomainError;
use maplewire_domain::ports::mailer::{MailSink, OutboundEmail};
use maplewire_domain::ports::BoxFuture;
use maplewire_domain::util::backoff_ms;
use maplewire_domain::DomainResult;

use crate::config::AppConfig;

const RELAY_TOKEN_HEADER: &str = "X-Relay-Token";

#[derive(Debug, thiserror::Error)]
pub enum MailRelayError {
    #[error("mail relay configuration error: {0}")]
    Configuration(String),
    #[error("mail relay rejected the message: {0}")]
    Rejected(String),
    #[error("mail relay upstream error: {0}")]
    Upstream(String),
    #[error("mail relay transport error: {0}")]
    Transport(String),
}

/// HTTP client for the outbound mail relay. Transient upstream failures are
/// retried with geometric backoff; a 4xx is final and never retried.
#[derive(Clone)]
pub struct RelayMailer {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry_max_attempts: u32,
    retry_backoff_base_ms: u64,
    retry_backoff_max_ms: u64,
}

impl RelayMailer {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.mail_relay_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let token = config.mail_relay_token.trim().to_string();
        Self {
            http,
            base_url: config.mail_relay_base_url.trim_end_matches('/').to_string(),
            token: if token.is_empty() { None } else { Some(token) },
            retry_max_attempts: config.mail_relay_retry_max_attempts.max(1),
            retry_backoff_base_ms: config.mail_relay_retry_backoff_base_ms,
            retry_backoff_max_ms: config.mail_relay_retry_backoff_max_ms,
        }
    }

    async fn deliver(&self, email: &OutboundEmail) -> Result<(), MailRelayError> {
        let token = self.token.as_ref().ok_or_else(|| {
            MailRelayError::Configuration("mail relay token is not configured".to_string())
        })?;
        let url = format!("{}/messages", self.base_url);

        for attempt in 1..=self.retry_max_attempts {
            let response = self
                .http
                .post(&url)
                .header(RELAY_TOKEN_HEADER, token)
                .json(email)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    if attempt < self.retry_max_attempts {
                        self.wait(attempt).await;
                        continue;
                    }
                    return Err(MailRelayError::Transport(err.to_string()));
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let message = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if attempt < self.retry_max_attempts {
                    self.wait(attempt).await;
                    continue;
                }
                return Err(MailRelayError::Upstream(format!(
                    "status {}: {}",
                    status.as_u16(),
                    message
                )));
            }
            return Err(MailRelayError::Rejected(format!(
                "status {}: {}",
                status.as_u16(),
                message
            )));
        }

        Err(MailRelayError::Upstream(
            "retry loop exited unexpectedly".to_string(),
        ))
    }

    async fn wait(&self, attempt: u32) {
        let delay = backoff_ms(
            self.retry_backoff_base_ms,
            attempt,
            self.retry_backoff_max_ms,
        );
        sleep(Duration::from_millis(delay)).await;
    }
}

impl MailSink for RelayMailer {
    fn send(&self, email: &OutboundEmail) -> BoxFuture<'_, DomainResult<()>> {
        let email = email.clone();
        Box::pin(async move {
            self.deliver(&email)
                .await
                .map_err(|err| DomainError::Delivery(err.to_string()))
        })
    }
}

/// Stand-in sink for environments without a relay; logs instead of sending.
#[derive(Default)]
pub struct NoopMailer;

impl MailSink for NoopMailer {
    fn send(&self, email: &OutboundEmail) -> BoxFuture<'_, DomainResult<()>> {
        tracing::debug!(
            recipient_id = %email.recipient_id,
            subject = %email.subject,
            "mail relay disabled, dropping email"
        );
        Box::pin(async move { Ok(()) })
    }
}
