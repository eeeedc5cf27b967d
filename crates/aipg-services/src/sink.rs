//! Log sink for service and child-process output.

use tracing::{error, info, warn};

/// Destination for orchestration log lines.
///
/// `source` names the service or component the line belongs to.
/// `persist` asks the sink to keep the line beyond the current session.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str, source: &str, persist: bool);
    fn warn(&self, message: &str, source: &str, persist: bool);
    fn error(&self, message: &str, source: &str, persist: bool);
}

/// Sink that forwards every line as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str, source: &str, persist: bool) {
        info!(source, persist, "{}", message);
    }

    fn warn(&self, message: &str, source: &str, persist: bool) {
        warn!(source, persist, "{}", message);
    }

    fn error(&self, message: &str, source: &str, persist: bool) {
        error!(source, persist, "{}", message);
    }
}
