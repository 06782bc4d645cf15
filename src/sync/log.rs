// ABOUTME: Logging capability injected into the reconciler
// ABOUTME: Production notices go to tracing; tests capture them in memory

use std::sync::Mutex;

/// Receives human-readable progress and outcome notices from a sync job.
pub trait SyncLog {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards notices to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl SyncLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Log level of a captured notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

/// Keeps every notice in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at `level`.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message)
            .collect()
    }

    fn push(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

impl SyncLog for MemoryLog {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_keeps_order_and_levels() {
        let log = MemoryLog::new();
        log.info("starting");
        log.error("boom");
        log.info("done");

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.messages(Level::Info), vec!["starting", "done"]);
        assert_eq!(log.messages(Level::Error), vec!["boom"]);
    }
}
