//! Logging setup for Rollcall with PII redaction helpers
//!
//! [`init_logging`] installs the global `tracing` subscriber: an `EnvFilter`
//! (honouring `RUST_LOG`) and either a human-readable or a JSON formatter
//! with RFC 3339 timestamps.
//!
//! Member names and officer e-mails end up in audit descriptions, so callers
//! pass such values through [`redact`] before attaching them to log fields:
//!
//! ```rust
//! let actor = logger_redacted::redact("officer@example.org");
//! tracing::info!(actor = %actor, "Reverted audit entry");
//! ```

pub mod config;
pub mod error;
pub mod redactor;

pub use config::*;
pub use error::*;
pub use redactor::*;

use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggerConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LoggerError::InvalidFilter(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_level(true),
            )
            .try_init()
    };

    installed.map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))
}
