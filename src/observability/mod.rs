//! Observability for the sync layer
//!
//! Structured logging through `tracing`. Every log line names an
//! [`Event`] in its `event` field; the subscriber installed by
//! [`init_logging`] renders either human-readable or JSON lines.
//!
//! # Usage
//!
//! ```
//! use pulseboard::config::LoggingConfig;
//! use pulseboard::observability::{init_logging, Event};
//!
//! init_logging(&LoggingConfig::default());
//! tracing::info!(event = Event::ConfigLoaded.as_str(), "ready");
//! ```

mod events;

pub use events::Event;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed, which is not an
/// error: embedders and test harnesses often install their own.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.is_ok()
}
