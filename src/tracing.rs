use crate::types::LoggingLevel;
use std::str::FromStr;

/// Primary log-level environment variable, single-letter codes or full names.
pub const CLI_LOG_LEVEL_ENV_VAR: &str = "TRACEGRAPH_CLI_LOG_LEVEL";

/// Legacy overrides: when set to `1`, raise the default level.
pub const LEGACY_DEBUG_ENV_VAR: &str = "TRACEGRAPH_DEBUG";
pub const LEGACY_VERBOSE_ENV_VAR: &str = "TRACEGRAPH_VERBOSE";

/// Resolves the effective logging level from the environment.
///
/// Precedence: `TRACEGRAPH_CLI_LOG_LEVEL`, then the legacy
/// `TRACEGRAPH_DEBUG`/`TRACEGRAPH_VERBOSE` switches, then warn.
pub fn env_logging_level() -> LoggingLevel {
    if let Ok(level) = std::env::var(CLI_LOG_LEVEL_ENV_VAR) {
        if let Ok(level) = LoggingLevel::from_str(&level) {
            return level;
        }
        eprintln!("Invalid {CLI_LOG_LEVEL_ENV_VAR} value '{level}', ignoring");
    }
    if std::env::var(LEGACY_DEBUG_ENV_VAR).as_deref() == Ok("1") {
        return LoggingLevel::Debug;
    }
    if std::env::var(LEGACY_VERBOSE_ENV_VAR).as_deref() == Ok("1") {
        return LoggingLevel::Info;
    }
    LoggingLevel::default()
}

pub fn try_init_tracing_subscriber() -> Result<(), Box<dyn std::error::Error>> {
    try_init_tracing_subscriber_with_level(env_logging_level())
}

pub fn try_init_tracing_subscriber_with_level(
    level: LoggingLevel,
) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt::Subscriber::builder();
    let env_filter = std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV)
        .map(tracing_subscriber::EnvFilter::new)
        .unwrap_or_else(|_| match level.as_tracing_level() {
            Some(level) => tracing_subscriber::EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                level,
            )),
            None => tracing_subscriber::EnvFilter::new("off"),
        });
    let builder = builder.with_env_filter(env_filter);
    let subscriber = builder.finish();
    use tracing_subscriber::util::SubscriberInitExt;
    subscriber.try_init()?;
    Ok(())
}
