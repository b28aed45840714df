// tests/common/mod.rs
// Test doubles for the sync collaborators.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use inat_sync::config::PullEventsConfig;
use inat_sync::sync::activity::MemoryActivityLog;
use inat_sync::sync::state::{MemoryStateStore, StateScope, StateStore};
use inat_sync::sync::types::{
    Annotation, Attachment, EventAck, EventDestination, MediaFetcher, NormalizedEvent,
    ObservationQuery, ObservationSource, Photo, SourceRecord,
};
use inat_sync::{SyncEngine, SyncOptions};

pub const INTEGRATION: &str = "f03ec73e-f3fe-41b6-8597-3eb89dde5ae1";
pub const ACTION: &str = "pull_events";

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

pub fn record(id: u64, updated_at: DateTime<Utc>) -> SourceRecord {
    SourceRecord {
        id,
        created_at: updated_at,
        updated_at,
        observed_on: None,
        location: Some((41.88, -87.62)),
        captive: Some(false),
        obscured: Some(false),
        place_guess: Some("Chicago, IL".into()),
        quality_grade: Some("research".into()),
        species_guess: Some("American Robin".into()),
        uri: Some(format!("https://www.inaturalist.org/observations/{id}")),
        user: None,
        place_ids: vec![],
        taxon: None,
        photos: vec![],
        annotations: vec![],
    }
}

/// Photos shaped like the v2 API returns them: only the square `url`.
pub fn with_photos(mut r: SourceRecord, photo_ids: &[u64]) -> SourceRecord {
    r.photos = photo_ids
        .iter()
        .map(|&id| Photo {
            id,
            url: Some(format!("https://static.test/photos/{id}/square.jpg")),
            large_url: None,
        })
        .collect();
    r
}

pub fn with_annotations(mut r: SourceRecord, pairs: &[(u64, u64)]) -> SourceRecord {
    r.annotations = pairs
        .iter()
        .map(|&(a, v)| Annotation {
            controlled_attribute_id: a,
            controlled_value_id: v,
        })
        .collect();
    r
}

pub fn photo_url(id: u64) -> String {
    format!("https://static.test/photos/{id}/large.jpg")
}

// ---------------------------------------------------------------- source

#[derive(Default)]
pub struct MockSource {
    pub pages: Vec<Vec<SourceRecord>>,
    pub fail_count: bool,
    pub fail_page: Option<u32>,
    pub queries: Mutex<Vec<ObservationQuery>>,
    pub calls: Mutex<Vec<String>>,
    pub fields: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn paged(records: Vec<SourceRecord>, page_size: usize) -> Self {
        Self {
            pages: records.chunks(page_size.max(1)).map(|c| c.to_vec()).collect(),
            ..Default::default()
        }
    }

    pub fn with_pages(pages: Vec<Vec<SourceRecord>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ObservationSource for MockSource {
    async fn count(&self, query: &ObservationQuery) -> Result<u64> {
        self.calls.lock().push("count".into());
        self.queries.lock().push(query.clone());
        if self.fail_count {
            return Err(anyhow!("source unavailable"));
        }
        Ok(self.pages.iter().map(|p| p.len() as u64).sum())
    }

    async fn fetch_page(
        &self,
        _query: &ObservationQuery,
        page: u32,
        _per_page: u32,
        fields: &[&str],
    ) -> Result<Vec<SourceRecord>> {
        self.calls.lock().push(format!("page {page}"));
        *self.fields.lock() = fields.iter().map(|f| f.to_string()).collect();
        if self.fail_page == Some(page) {
            return Err(anyhow!("page {page} timed out"));
        }
        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "MockSource"
    }
}

// ----------------------------------------------------------- destination

#[derive(Default)]
pub struct MockDestination {
    /// 1-based submit calls that fail.
    pub fail_batches: HashSet<usize>,
    pub fail_updates: HashSet<String>,
    pub fail_uploads: HashSet<String>,
    pub batches: Mutex<Vec<Vec<NormalizedEvent>>>,
    pub updates: Mutex<Vec<(String, NormalizedEvent)>>,
    pub uploads: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockDestination {
    pub fn object_id(source_id: &str) -> String {
        format!("obj-{source_id}")
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|e| e.source_id.clone())
            .collect()
    }

    pub fn untouched(&self) -> bool {
        self.batches.lock().is_empty()
            && self.updates.lock().is_empty()
            && self.uploads.lock().is_empty()
    }
}

#[async_trait]
impl EventDestination for MockDestination {
    async fn submit_batch(&self, events: &[NormalizedEvent]) -> Result<Vec<EventAck>> {
        let n = {
            let mut b = self.batches.lock();
            b.push(events.to_vec());
            b.len()
        };
        if self.fail_batches.contains(&n) {
            return Err(anyhow!("502 Bad Gateway"));
        }
        Ok(events
            .iter()
            .map(|e| EventAck {
                source_id: e.source_id.clone(),
                object_id: Self::object_id(&e.source_id),
            })
            .collect())
    }

    async fn update_one(&self, object_id: &str, event: &NormalizedEvent) -> Result<()> {
        self.updates
            .lock()
            .push((object_id.to_string(), event.clone()));
        if self.fail_updates.contains(object_id) {
            return Err(anyhow!("404 Not Found"));
        }
        Ok(())
    }

    async fn upload_attachments(&self, object_id: &str, files: Vec<Attachment>) -> Result<()> {
        self.uploads.lock().push((
            object_id.to_string(),
            files.into_iter().map(|f| f.filename).collect(),
        ));
        if self.fail_uploads.contains(object_id) {
            return Err(anyhow!("413 Payload Too Large"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------- media

#[derive(Default)]
pub struct MockMedia {
    pub failing: HashSet<String>,
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaFetcher for MockMedia {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.lock().push(url.to_string());
        if self.failing.contains(url) {
            return Err(anyhow!("connection reset"));
        }
        Ok(url.as_bytes().to_vec())
    }
}

// ----------------------------------------------------------------- state

/// Memory store whose writes can be made to fail per scope kind.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStateStore,
    pub fail_record_writes: bool,
    pub fail_run_writes: bool,
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, scope: &StateScope) -> Result<Option<Value>> {
        self.inner.get(scope).await
    }

    async fn set(&self, scope: &StateScope, value: Value) -> Result<()> {
        if self.fail_record_writes && scope.source_id.is_some() {
            return Err(anyhow!("redis connection refused"));
        }
        if self.fail_run_writes && scope.source_id.is_none() {
            return Err(anyhow!("redis READONLY replica"));
        }
        self.inner.set(scope, value).await
    }
}

pub fn watermark_value(store: &MemoryStateStore) -> Option<Value> {
    store.peek(&StateScope::run(INTEGRATION, ACTION))
}

pub fn sync_record(store: &MemoryStateStore, source_id: u64) -> Option<Value> {
    store.peek(&StateScope::record(INTEGRATION, ACTION, &source_id.to_string()))
}

pub async fn seed_sync_record(store: &MemoryStateStore, source_id: u64, object_id: &str) {
    store
        .set(
            &StateScope::record(INTEGRATION, ACTION, &source_id.to_string()),
            json!({ "object_id": object_id }),
        )
        .await
        .unwrap();
}

// ---------------------------------------------------------------- wiring

pub struct Harness {
    pub source: Arc<MockSource>,
    pub destination: Arc<MockDestination>,
    pub media: Arc<MockMedia>,
    pub store: Arc<MemoryStateStore>,
    pub activity: Arc<MemoryActivityLog>,
}

impl Harness {
    pub fn new(source: MockSource, destination: MockDestination) -> Self {
        Self {
            source: Arc::new(source),
            destination: Arc::new(destination),
            media: Arc::new(MockMedia::default()),
            store: Arc::new(MemoryStateStore::new()),
            activity: Arc::new(MemoryActivityLog::new()),
        }
    }

    pub fn with_media(mut self, media: MockMedia) -> Self {
        self.media = Arc::new(media);
        self
    }

    pub fn engine(&self, config: PullEventsConfig, options: SyncOptions) -> SyncEngine {
        SyncEngine::new(
            INTEGRATION,
            config,
            self.source.clone(),
            self.destination.clone(),
            self.store.clone(),
        )
        .with_options(options)
        .with_media_fetcher(self.media.clone())
        .with_activity_log(self.activity.clone())
    }

    pub fn warnings(&self) -> Vec<String> {
        self.activity
            .snapshot()
            .into_iter()
            .map(|e| e.title)
            .collect()
    }
}

pub fn counts_by_object(uploads: &[(String, Vec<String>)]) -> HashMap<String, usize> {
    uploads
        .iter()
        .map(|(obj, files)| (obj.clone(), files.len()))
        .collect()
}
