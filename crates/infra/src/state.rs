use std::sync::Arc;

use anyhow::Result;

use maplewire_domain::connections::ConnectionService;
use maplewire_domain::messages::MessageService;
use maplewire_domain::notifications::NotificationService;
use maplewire_domain::ports::mailer::MailSink;
use maplewire_domain::rooms::RoomProvisioner;

use crate::config::AppConfig;
use crate::logging::init_tracing;
use crate::mailer::{NoopMailer, RelayMailer};
use crate::realtime::LocalRealtimeBus;
use crate::repositories::{
    InMemoryBusinessDirectory, InMemoryChatMessageRepository, InMemoryChatRoomRepository,
    InMemoryConnectionRequestRepository, InMemoryNotificationRepository,
};

/// Fully wired service graph over the configured adapters.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub directory: Arc<InMemoryBusinessDirectory>,
    pub bus: Arc<LocalRealtimeBus>,
    pub connections: ConnectionService,
    pub messages: MessageService,
    pub notifications: NotificationService,
}

impl AppState {
    /// Environment-driven startup: load config, install tracing, then wire
    /// the services.
    pub fn from_env() -> Result<Self> {
        let config = AppConfig::load()?;
        init_tracing(&config)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: AppConfig) -> Self {
        if config.data_backend != "memory" {
            tracing::warn!(
                backend = %config.data_backend,
                "unknown data backend, falling back to the in-memory store"
            );
        }

        let directory = Arc::new(InMemoryBusinessDirectory::new());
        let requests = Arc::new(InMemoryConnectionRequestRepository::new());
        let rooms = Arc::new(InMemoryChatRoomRepository::new());
        let message_rows = Arc::new(InMemoryChatMessageRepository::new());
        let notification_rows = Arc::new(InMemoryNotificationRepository::new());
        let bus = Arc::new(LocalRealtimeBus::new());

        let mailer: Arc<dyn MailSink> = if config.mail_relay_enabled {
            Arc::new(RelayMailer::from_config(&config))
        } else {
            Arc::new(NoopMailer)
        };

        let notifications =
            NotificationService::new(notification_rows, bus.clone()).with_mailer(mailer);
        let provisioner =
            RoomProvisioner::with_retry(rooms.clone(), config.provision_retry_policy());
        let connections = ConnectionService::new(
            requests,
            directory.clone(),
            provisioner,
            notifications.clone(),
        );
        let messages =
            MessageService::new(message_rows, rooms, bus.clone(), notifications.clone());

        Self {
            config,
            directory,
            bus,
            connections,
            messages,
            notifications,
        }
    }
}
