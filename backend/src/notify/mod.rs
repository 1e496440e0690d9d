//! User-facing notifications and operation logs.
//!
//! Sync and store operations report through a [`LogBroadcaster`]. Entries go
//! to every subscriber (toasts, status bars) and, unless the broadcaster is
//! quiet, are echoed to stderr so stdout stays free for command output.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entries buffered per subscriber before the oldest are dropped
const CHANNEL_CAPACITY: usize = 100;

/// Severity of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    /// Marker printed in front of echoed entries.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Info => "",
            Self::Success => "✓",
            Self::Warning => "⚠️",
            Self::Error => "❌",
        }
    }
}

/// One notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Nesting depth (per-file lines inside a batch)
    #[serde(default)]
    pub indent: u8,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            indent: 0,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }

    /// Line as echoed to the terminal.
    pub fn render(&self) -> String {
        let pad = "   ".repeat(self.indent as usize + 1);
        match self.level.marker() {
            "" => format!("{}{}", pad, self.message),
            marker => format!("{}{} {}", pad, marker, self.message),
        }
    }
}

/// Broadcaster used when none is injected
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Fans entries out to subscribers. Clones share the channel.
#[derive(Clone)]
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
    echo: bool,
}

impl LogBroadcaster {
    /// Broadcaster that also echoes to stderr.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, echo: true }
    }

    /// Broadcaster that only notifies subscribers.
    pub fn quiet() -> Self {
        Self {
            echo: false,
            ..Self::new()
        }
    }

    pub fn log(&self, entry: LogEntry) {
        if self.echo {
            eprintln!("{}", entry.render());
        }
        // No subscribers is fine
        let _ = self.sender.send(entry);
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.log(LogEntry::info(msg));
    }

    pub fn success(&self, msg: impl Into<String>) {
        self.log(LogEntry::success(msg));
    }

    pub fn warning(&self, msg: impl Into<String>) {
        self.log(LogEntry::warning(msg));
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.log(LogEntry::error(msg));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Warn on the global broadcaster, for code without an injected one.
pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.warning(msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_receive_entries() {
        let logs = LogBroadcaster::quiet();
        let mut rx = logs.subscribe();

        logs.warning("Using local data");
        logs.log(LogEntry::info("kpis.csv").with_indent(1));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.level, LogLevel::Warning);
        assert_eq!(first.message, "Using local data");
        assert_eq!(rx.try_recv().unwrap().indent, 1);
    }

    #[test]
    fn test_clone_shares_channel() {
        let logs = LogBroadcaster::quiet();
        let mut rx = logs.subscribe();
        logs.clone().success("saved");
        assert_eq!(rx.try_recv().unwrap().level, LogLevel::Success);
    }

    #[test]
    fn test_render() {
        assert_eq!(LogEntry::info("Loading").render(), "   Loading");
        assert_eq!(LogEntry::success("kpis").with_indent(1).render(), "      ✓ kpis");
        assert_eq!(LogEntry::error("boom").render(), "   ❌ boom");
    }

    #[test]
    fn test_entry_serialization() {
        let json = serde_json::to_value(LogEntry::error("boom")).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["indent"], 0);
    }
}
