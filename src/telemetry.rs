//! Structured logging setup with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Default filter directives for `level`
pub fn default_directives(level: &str) -> String {
    format!("loopguard={},tower_http=debug", level)
}

/// Initialize tracing subscriber for structured logging
///
/// Only the first call per process has any effect. `RUST_LOG` takes
/// precedence over `default_level`.
///
/// # Examples
///
/// ```no_run
/// loopguard::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_crate() {
        assert_eq!(default_directives("warn"), "loopguard=warn,tower_http=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("info");
        tracing::info!("telemetry initialized twice without panicking");
    }
}
