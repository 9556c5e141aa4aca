use crate::config::AppConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: json lines in production, compact
/// human-readable output everywhere else. The level comes from the config
/// with an "info" fallback for unparsable directives. A second call reports
/// the conflict as an error instead of panicking.
pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);

    if config.is_production() {
        builder
            .json()
            .try_init()
            .map_err(|err| anyhow!("tracing subscriber already set: {err}"))?;
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|err| anyhow!("tracing subscriber already set: {err}"))?;
    }

    Ok(())
}
