//! Persisted sync state: per-record sync markers and the run watermark.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::sync::error::{SyncError, SyncResult};

/// Watermark timestamp layout kept compatible with previously stored state.
pub const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S%z";

/// Key for one state value: `(integration, action[, source record id])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateScope {
    pub integration_id: String,
    pub action_id: String,
    pub source_id: Option<String>,
}

impl StateScope {
    pub fn run(integration_id: &str, action_id: &str) -> Self {
        Self {
            integration_id: integration_id.to_string(),
            action_id: action_id.to_string(),
            source_id: None,
        }
    }

    pub fn record(integration_id: &str, action_id: &str, source_id: &str) -> Self {
        Self {
            source_id: Some(source_id.to_string()),
            ..Self::run(integration_id, action_id)
        }
    }

    pub fn key(&self) -> String {
        match &self.source_id {
            Some(src) => format!(
                "integration_state.{}.{}.{}",
                self.integration_id, self.action_id, src
            ),
            None => format!("integration_state.{}.{}", self.integration_id, self.action_id),
        }
    }
}

#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, scope: &StateScope) -> Result<Option<Value>>;
    async fn set(&self, scope: &StateScope, value: Value) -> Result<()>;
}

/// In-process store. Also handy for callers that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: parking_lot::Mutex<HashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Raw value under `scope`, bypassing the async API.
    pub fn peek(&self, scope: &StateScope) -> Option<Value> {
        self.inner.lock().get(&scope.key()).cloned()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, scope: &StateScope) -> Result<Option<Value>> {
        Ok(self.inner.lock().get(&scope.key()).cloned())
    }

    async fn set(&self, scope: &StateScope, value: Value) -> Result<()> {
        self.inner.lock().insert(scope.key(), value);
        Ok(())
    }
}

/// Single JSON document on disk. Loaded once per instance, then served from
/// memory; every `set` rewrites the file.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    cache: tokio::sync::Mutex<Option<BTreeMap<String, Value>>>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing state file {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => {
                Err(e).with_context(|| format!("reading state file {}", self.path.display()))
            }
        }
    }

    async fn write_all(&self, all: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(all)?)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))
    }
}

#[async_trait::async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, scope: &StateScope) -> Result<Option<Value>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_all().await?);
        }
        Ok(cache.as_ref().and_then(|all| all.get(&scope.key()).cloned()))
    }

    async fn set(&self, scope: &StateScope, value: Value) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut all = match cache.take() {
            Some(all) => all,
            None => self.read_all().await?,
        };
        all.insert(scope.key(), value);
        let written = self.write_all(&all).await;
        // The cache keeps the new value even if the write failed.
        *cache = Some(all);
        written
    }
}

/// Correlation between a source record and the destination object created for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatermarkState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_run: Option<String>,
}

pub fn format_watermark(ts: DateTime<Utc>) -> String {
    ts.format(WATERMARK_FORMAT).to_string()
}

pub fn parse_watermark(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s.trim(), WATERMARK_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s.trim()))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reads and writes one integration action's sync state.
#[derive(Clone)]
pub struct SyncStateTracker {
    store: Arc<dyn StateStore>,
    integration_id: String,
    action_id: String,
}

impl SyncStateTracker {
    pub fn new(store: Arc<dyn StateStore>, integration_id: &str, action_id: &str) -> Self {
        Self {
            store,
            integration_id: integration_id.to_string(),
            action_id: action_id.to_string(),
        }
    }

    fn run_scope(&self) -> StateScope {
        StateScope::run(&self.integration_id, &self.action_id)
    }

    fn record_scope(&self, source_id: &str) -> StateScope {
        StateScope::record(&self.integration_id, &self.action_id, source_id)
    }

    /// Stored watermark; `updated_to` takes precedence over `last_run`.
    pub async fn load_watermark(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let scope = self.run_scope();
        let raw = self
            .store
            .get(&scope)
            .await
            .map_err(|source| state_err("get", &scope, source))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let state: WatermarkState = serde_json::from_value(raw).unwrap_or_default();
        let parsed = [state.updated_to.as_deref(), state.last_run.as_deref()]
            .into_iter()
            .flatten()
            .find_map(|s| {
                let ts = parse_watermark(s);
                if ts.is_none() {
                    tracing::warn!(value = s, "ignoring unparseable watermark");
                }
                ts
            });
        Ok(parsed)
    }

    pub async fn save_watermark(&self, ts: DateTime<Utc>) -> SyncResult<()> {
        let scope = self.run_scope();
        let state = WatermarkState {
            updated_to: None,
            last_run: Some(format_watermark(ts)),
        };
        let value = serde_json::to_value(state).map_err(|e| state_err("set", &scope, e.into()))?;
        self.store
            .set(&scope, value)
            .await
            .map_err(|source| state_err("set", &scope, source))
    }

    pub async fn lookup(&self, source_id: &str) -> SyncResult<Option<SyncRecord>> {
        let scope = self.record_scope(source_id);
        let raw = self
            .store
            .get(&scope)
            .await
            .map_err(|source| state_err("get", &scope, source))?;
        Ok(raw.and_then(|v| match serde_json::from_value::<SyncRecord>(v) {
            Ok(rec) if !rec.object_id.is_empty() => Some(rec),
            _ => {
                tracing::warn!(source_id, "stored sync record has no object_id; treating as new");
                None
            }
        }))
    }

    pub async fn record(&self, source_id: &str, record: &SyncRecord) -> SyncResult<()> {
        let scope = self.record_scope(source_id);
        let value =
            serde_json::to_value(record).map_err(|e| state_err("set", &scope, e.into()))?;
        self.store
            .set(&scope, value)
            .await
            .map_err(|source| state_err("set", &scope, source))
    }
}

fn state_err(op: &'static str, scope: &StateScope, source: anyhow::Error) -> SyncError {
    SyncError::State {
        op,
        key: scope.key(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn scope_keys() {
        assert_eq!(StateScope::run("i", "pull_events").key(), "integration_state.i.pull_events");
        assert_eq!(
            StateScope::record("i", "pull_events", "42").key(),
            "integration_state.i.pull_events.42"
        );
    }

    #[test]
    fn watermark_format_round_trips() {
        let ts = Utc.with_ymd_and_hms(2024, 11, 3, 17, 45, 9).unwrap();
        let s = format_watermark(ts);
        assert_eq!(s, "2024-11-03 17:45:09+0000");
        assert_eq!(parse_watermark(&s), Some(ts));
        assert_eq!(parse_watermark("2024-11-03T17:45:09Z"), Some(ts));
        assert_eq!(parse_watermark("nope"), None);
    }

    #[tokio::test]
    async fn updated_to_takes_precedence() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .set(
                &StateScope::run("i", "a"),
                json!({
                    "last_run": "2024-01-01 00:00:00+0000",
                    "updated_to": "2024-02-01 00:00:00+0000"
                }),
            )
            .await
            .unwrap();
        let tracker = SyncStateTracker::new(store, "i", "a");
        let wm = tracker.load_watermark().await.unwrap().unwrap();
        assert_eq!(wm, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn garbled_updated_to_falls_back_to_last_run() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .set(
                &StateScope::run("i", "a"),
                json!({"last_run": "2024-01-01 00:00:00+0000", "updated_to": "soon"}),
            )
            .await
            .unwrap();
        let tracker = SyncStateTracker::new(store.clone(), "i", "a");
        let wm = tracker.load_watermark().await.unwrap();
        assert_eq!(wm, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));

        store
            .set(&StateScope::run("i", "a"), json!({"last_run": "never"}))
            .await
            .unwrap();
        assert_eq!(tracker.load_watermark().await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_lookup_and_malformed_entries() {
        let store = Arc::new(MemoryStateStore::new());
        let tracker = SyncStateTracker::new(store.clone(), "i", "a");
        assert!(tracker.lookup("1").await.unwrap().is_none());

        let rec = SyncRecord {
            object_id: "obj-1".into(),
            source_id: Some("1".into()),
        };
        tracker.record("1", &rec).await.unwrap();
        assert_eq!(tracker.lookup("1").await.unwrap(), Some(rec));

        store
            .set(&StateScope::record("i", "a", "2"), json!({"unexpected": true}))
            .await
            .unwrap();
        assert!(tracker.lookup("2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStateStore::new(&path);
        assert!(store.get(&StateScope::run("i", "a")).await.unwrap().is_none());
        store
            .set(&StateScope::run("i", "a"), json!({"last_run": "x"}))
            .await
            .unwrap();
        store
            .set(&StateScope::record("i", "a", "7"), json!({"object_id": "o7"}))
            .await
            .unwrap();

        // served from the cache loaded by the first `get`
        assert_eq!(
            store.get(&StateScope::record("i", "a", "7")).await.unwrap(),
            Some(json!({"object_id": "o7"}))
        );

        let reopened = FileStateStore::new(&path);
        assert_eq!(
            reopened.get(&StateScope::record("i", "a", "7")).await.unwrap(),
            Some(json!({"object_id": "o7"}))
        );
        assert_eq!(
            reopened.get(&StateScope::run("i", "a")).await.unwrap(),
            Some(json!({"last_run": "x"}))
        );
    }

    #[tokio::test]
    async fn file_store_reads_disk_once_per_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"integration_state.i.a.1": {"object_id": "o1"}}"#).unwrap();

        let store = FileStateStore::new(&path);
        let scope = StateScope::record("i", "a", "1");
        assert_eq!(
            store.get(&scope).await.unwrap(),
            Some(json!({"object_id": "o1"}))
        );

        // Later external edits are not re-read by this instance.
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(
            store.get(&scope).await.unwrap(),
            Some(json!({"object_id": "o1"}))
        );

        store
            .set(&StateScope::record("i", "a", "2"), json!({"object_id": "o2"}))
            .await
            .unwrap();
        let on_disk: serde_json::Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert!(on_disk.contains_key("integration_state.i.a.1"));
    }
}
