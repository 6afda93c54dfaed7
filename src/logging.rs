//! Logging for lifecycle builds.
//!
//! Phases only need two things from a logger: whether the build is verbose
//! (which gates `-log-level debug`) and somewhere to send container output.
//! [`TracingLogger`] routes both through `tracing`.

use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logger capability consumed by the lifecycle.
pub trait Logger: Send + Sync {
    fn is_verbose(&self) -> bool;

    /// Forwards one line of phase container output.
    fn phase_output(&self, phase: &str, line: &str) {
        info!("[{}] {}", phase, line);
    }
}

/// `tracing`-backed logger.
#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    verbose: bool,
}

impl TracingLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Verbose when the installed subscriber lets DEBUG events through.
    pub fn from_subscriber() -> Self {
        Self::new(LevelFilter::current() >= LevelFilter::DEBUG)
    }
}

impl Logger for TracingLogger {
    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes priority over `level`.
pub fn init(level: &str) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_logger_verbosity() {
        assert!(TracingLogger::new(true).is_verbose());
        assert!(!TracingLogger::new(false).is_verbose());
    }
}
