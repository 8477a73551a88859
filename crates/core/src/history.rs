use crate::action::ActionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of entries kept; the oldest is evicted first.
pub const HISTORY_CAPACITY: usize = 50;

/// One processed command, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLogEntry {
    /// `None` when the utterance could not be classified.
    pub kind: Option<ActionKind>,
    pub text: String,
    pub result: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl CommandLogEntry {
    /// Label used by history views: the kind, "error" for a failed
    /// classification, or "unknown".
    pub fn type_label(&self) -> &'static str {
        match (self.kind, self.success) {
            (Some(kind), _) => kind.as_str(),
            (None, false) => "error",
            (None, true) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: VecDeque<CommandLogEntry>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: CommandLogEntry) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<CommandLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&CommandLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> CommandLogEntry {
        CommandLogEntry {
            kind: Some(ActionKind::Creation),
            text: format!("make cube {n}"),
            result: "created".into(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = CommandLog::new();
        for n in 0..HISTORY_CAPACITY + 5 {
            log.record(entry(n));
        }
        assert_eq!(log.len(), HISTORY_CAPACITY);
        let entries = log.entries();
        assert_eq!(entries[0].text, "make cube 5");
        assert_eq!(log.last().unwrap().text, format!("make cube {}", HISTORY_CAPACITY + 4));
    }

    #[test]
    fn test_type_label() {
        let mut failed = entry(0);
        failed.kind = None;
        failed.success = false;
        assert_eq!(failed.type_label(), "error");
        assert_eq!(entry(1).type_label(), "creation");
    }

    #[test]
    fn test_clear() {
        let mut log = CommandLog::new();
        log.record(entry(0));
        log.clear();
        assert!(log.is_empty());
    }
}
