// src/sync/activity.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Human-visible activity entry for an integration action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub integration_id: String,
    pub action_id: String,
    pub level: LogLevel,
    pub title: String,
    pub data: Value,
}

/// Side channel for operators. Never consulted for control flow, so it cannot fail.
#[async_trait::async_trait]
pub trait ActivityLog: Send + Sync {
    async fn log(&self, entry: ActivityEntry);
}

/// Writes activity entries to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

#[async_trait::async_trait]
impl ActivityLog for TracingActivityLog {
    async fn log(&self, entry: ActivityEntry) {
        let data = entry.data.to_string();
        match entry.level {
            LogLevel::Debug => tracing::debug!(
                target: "activity",
                integration_id = %entry.integration_id,
                action_id = %entry.action_id,
                data = %data,
                "{}",
                entry.title
            ),
            LogLevel::Info => tracing::info!(
                target: "activity",
                integration_id = %entry.integration_id,
                action_id = %entry.action_id,
                data = %data,
                "{}",
                entry.title
            ),
            LogLevel::Warning => tracing::warn!(
                target: "activity",
                integration_id = %entry.integration_id,
                action_id = %entry.action_id,
                data = %data,
                "{}",
                entry.title
            ),
            LogLevel::Error => tracing::error!(
                target: "activity",
                integration_id = %entry.integration_id,
                action_id = %entry.action_id,
                data = %data,
                "{}",
                entry.title
            ),
        }
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    pub entries: parking_lot::Mutex<Vec<ActivityEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait::async_trait]
impl ActivityLog for MemoryActivityLog {
    async fn log(&self, entry: ActivityEntry) {
        self.entries.lock().push(entry);
    }
}
