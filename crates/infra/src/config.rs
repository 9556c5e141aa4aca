use maplewire_domain::rooms::RetryPolicy;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub data_backend: String,
    pub provision_max_attempts: u32,
    pub provision_backoff_base_ms: u64,
    pub provision_backoff_max_ms: u64,
    pub mail_relay_enabled: bool,
    pub mail_relay_base_url: String,
    pub mail_relay_token: String,
    pub mail_relay_timeout_ms: u64,
    pub mail_relay_retry_max_attempts: u32,
    pub mail_relay_retry_backoff_base_ms: u64,
    pub mail_relay_retry_backoff_max_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("provision_max_attempts", 3)?
            .set_default("provision_backoff_base_ms", 200)?
            .set_default("provision_backoff_max_ms", 2000)?
            .set_default("mail_relay_enabled", false)?
            .set_default("mail_relay_base_url", "http://127.0.0.1:8025")?
            .set_default("mail_relay_token", "")?
            .set_default("mail_relay_timeout_ms", 5000)?
            .set_default("mail_relay_retry_max_attempts", 3)?
            .set_default("mail_relay_retry_backoff_base_ms", 500)?
            .set_default("mail_relay_retry_backoff_max_ms", 5000)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn provision_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.provision_max_attempts.max(1),
            backoff_base_ms: self.provision_backoff_base_ms,
            backoff_max_ms: self.provision_backoff_max_ms,
        }
    }
}
