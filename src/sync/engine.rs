//! # Reconciliation Engine
//! One bounded pull-events run: fetch the window since the stored watermark,
//! split records into create vs patch using persisted sync records, submit new
//! events in batches, transfer their media, patch the rest, then commit the
//! watermark.
//!
//! Only source failures and state-store failures abort a run. Batch, patch and
//! attachment failures are reported and excluded from the summary counts.

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::PullEventsConfig;
use crate::providers::media::HttpMediaFetcher;
use crate::sync::activity::{ActivityEntry, ActivityLog, LogLevel, TracingActivityLog};
use crate::sync::attachments::transfer_event_media;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::fetcher::{FetchOutcome, PaginatedFetcher, DEFAULT_PAGE_SIZE};
use crate::sync::state::{format_watermark, StateStore, SyncRecord, SyncStateTracker};
use crate::sync::transform::transform;
use crate::sync::types::{
    EventAck, EventDestination, MediaFetcher, NormalizedEvent, ObservationQuery,
    ObservationSource, SourceRecord,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_ACTION_ID: &str = "pull_events";

/// Phases of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Fetching,
    Classifying,
    SubmittingNew,
    Attaching,
    Patching,
    Committing,
    Done,
    Failed,
}

impl RunPhase {
    /// Legal transitions. `Failed` is only reachable from phases that can hit
    /// a fatal error (source fetch or state store).
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Fetching, Classifying | Committing | Done | Failed)
                | (Classifying, SubmittingNew | Failed)
                | (SubmittingNew, Attaching | Patching | Failed)
                | (Attaching, Patching)
                | (Patching, Committing)
                | (Committing, Done | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// New events acknowledged by the destination.
    pub events_extracted: usize,
    /// Previously-synced events patched successfully.
    pub events_updated: usize,
    /// Attachments accepted by the destination.
    pub photos_attached: usize,
    /// New events that had at least one media item to transfer.
    pub events_with_attachments: usize,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub action_id: String,
    pub page_size: u32,
    pub batch_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            action_id: DEFAULT_ACTION_ID.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl SyncOptions {
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = action_id.into();
        self
    }
}

struct PhaseTracker<'a> {
    phase: RunPhase,
    integration_id: &'a str,
}

impl<'a> PhaseTracker<'a> {
    fn new(integration_id: &'a str) -> Self {
        Self {
            phase: RunPhase::Fetching,
            integration_id,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal run transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(
            integration_id = self.integration_id,
            from = ?self.phase,
            to = ?next,
            "run phase"
        );
        self.phase = next;
    }

    fn fail(&mut self, err: SyncError) -> SyncError {
        tracing::error!(
            integration_id = self.integration_id,
            phase = ?self.phase,
            needs_attention = true,
            error = %err,
            "sync run aborted"
        );
        self.advance(RunPhase::Failed);
        err
    }
}

/// Records queued for creation and for patching.
struct Classified {
    to_create: Vec<SourceRecord>,
    to_patch: Vec<(String, SourceRecord)>,
}

pub struct SyncEngine {
    integration_id: String,
    config: PullEventsConfig,
    options: SyncOptions,
    source: Arc<dyn ObservationSource>,
    destination: Arc<dyn EventDestination>,
    store: Arc<dyn StateStore>,
    media: Arc<dyn MediaFetcher>,
    activity: Arc<dyn ActivityLog>,
}

impl SyncEngine {
    pub fn new(
        integration_id: impl Into<String>,
        config: PullEventsConfig,
        source: Arc<dyn ObservationSource>,
        destination: Arc<dyn EventDestination>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            integration_id: integration_id.into(),
            config,
            options: SyncOptions::default(),
            source,
            destination,
            store,
            media: Arc::new(HttpMediaFetcher::default()),
            activity: Arc::new(TracingActivityLog),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_media_fetcher(mut self, media: Arc<dyn MediaFetcher>) -> Self {
        self.media = media;
        self
    }

    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn config(&self) -> &PullEventsConfig {
        &self.config
    }

    pub async fn run(&self) -> SyncResult<RunSummary> {
        self.run_at(Utc::now()).await
    }

    /// Run once with `now` as the reference time for the default lookback.
    pub async fn run_at(&self, now: DateTime<Utc>) -> SyncResult<RunSummary> {
        super::ensure_metrics_described();
        let mut phase = PhaseTracker::new(&self.integration_id);
        let state = SyncStateTracker::new(
            self.store.clone(),
            &self.integration_id,
            &self.options.action_id,
        );
        tracing::info!(
            integration_id = %self.integration_id,
            action_id = %self.options.action_id,
            "executing pull events"
        );

        // Fetching
        let watermark = state.load_watermark().await.map_err(|e| phase.fail(e))?;
        let since =
            watermark.unwrap_or(now - Duration::days(i64::from(self.config.days_to_load)));
        let query = self.query(since);
        let fetched = PaginatedFetcher::new(self.source.as_ref())
            .with_page_size(self.options.page_size)
            .fetch(&query, &self.config.annotations)
            .await
            .map_err(|e| phase.fail(e))?;

        gauge!("sync_last_run_ts").set(now.timestamp().max(0) as f64);

        if fetched.fetched == 0 {
            self.warn_nothing_to_process().await;
            phase.advance(RunPhase::Done);
            return Ok(RunSummary::default());
        }

        let mut summary = RunSummary::default();
        let newest = fetched.newest_update;

        if fetched.records.is_empty() {
            // Everything was filtered out; the window still advances.
            self.warn_nothing_to_process().await;
        } else {
            tracing::info!(
                integration_id = %self.integration_id,
                records = fetched.records.len(),
                filtered_out = fetched.filtered_out,
                "processing observations"
            );
            phase.advance(RunPhase::Classifying);
            let classified = self
                .classify(&state, fetched)
                .await
                .map_err(|e| phase.fail(e))?;

            phase.advance(RunPhase::SubmittingNew);
            let media_by_source: HashMap<String, Vec<(u64, String)>> = classified
                .to_create
                .iter()
                .map(|r| (r.id.to_string(), r.media_refs()))
                .collect();
            let acks = self
                .submit_new(&state, &classified.to_create)
                .await
                .map_err(|e| phase.fail(e))?;
            summary.events_extracted = acks.len();

            if self.config.include_photos {
                phase.advance(RunPhase::Attaching);
                self.attach(&acks, &media_by_source, &mut summary).await;
            }

            phase.advance(RunPhase::Patching);
            summary.events_updated = self.patch_all(&classified.to_patch).await;
        }

        phase.advance(RunPhase::Committing);
        if let Some(newest) = newest {
            let next = watermark.map_or(newest, |prev| prev.max(newest));
            tracing::info!(
                integration_id = %self.integration_id,
                "Updating state through {}",
                format_watermark(next)
            );
            state.save_watermark(next).await.map_err(|e| phase.fail(e))?;
        }
        phase.advance(RunPhase::Done);

        tracing::info!(
            integration_id = %self.integration_id,
            events_extracted = summary.events_extracted,
            events_updated = summary.events_updated,
            photos_attached = summary.photos_attached,
            events_with_attachments = summary.events_with_attachments,
            "pull events finished"
        );
        Ok(summary)
    }

    fn query(&self, since: DateTime<Utc>) -> ObservationQuery {
        ObservationQuery {
            updated_since: since,
            bounding_box: self.config.bounding_box,
            taxon_ids: self.config.taxa.clone(),
            project_ids: self.config.projects.clone(),
            quality_grades: self.config.quality_grades.clone(),
        }
    }

    async fn classify(
        &self,
        state: &SyncStateTracker,
        fetched: FetchOutcome,
    ) -> SyncResult<Classified> {
        let mut out = Classified {
            to_create: Vec::new(),
            to_patch: Vec::new(),
        };
        for record in fetched.records.into_vec() {
            match state.lookup(&record.id.to_string()).await? {
                Some(saved) => out.to_patch.push((saved.object_id, record)),
                None => out.to_create.push(record),
            }
        }
        tracing::debug!(
            to_create = out.to_create.len(),
            to_patch = out.to_patch.len(),
            "classified records"
        );
        Ok(out)
    }

    /// Submit new records batch by batch. Returns the acknowledged events.
    /// Fails only when a sync record cannot be persisted.
    async fn submit_new(
        &self,
        state: &SyncStateTracker,
        records: &[SourceRecord],
    ) -> SyncResult<Vec<EventAck>> {
        if records.is_empty() {
            tracing::info!(
                integration_id = %self.integration_id,
                "No new observations to create"
            );
            return Ok(Vec::new());
        }
        tracing::info!(
            integration_id = %self.integration_id,
            "Submitting {} observations to the destination",
            records.len()
        );

        let mut acked = Vec::new();
        for (i, chunk) in records.chunks(self.options.batch_size).enumerate() {
            let batch_no = i + 1;
            tracing::info!("Processing chunk #{batch_no}");
            let events: Vec<NormalizedEvent> =
                chunk.iter().map(|r| transform(r, &self.config)).collect();

            let acks = match self.submit_batch(batch_no, &events).await {
                Ok(acks) => acks,
                Err(e) => {
                    self.report_batch_failure(&e, &events).await;
                    continue;
                }
            };

            let sent: HashSet<&str> = events.iter().map(|e| e.source_id.as_str()).collect();
            for ack in acks {
                if !sent.contains(ack.source_id.as_str()) {
                    tracing::warn!(
                        source_id = %ack.source_id,
                        object_id = %ack.object_id,
                        "ack for a record outside this batch; ignoring"
                    );
                    continue;
                }
                let record = SyncRecord {
                    object_id: ack.object_id.clone(),
                    source_id: Some(ack.source_id.clone()),
                };
                if let Err(e) = state.record(&ack.source_id, &record).await {
                    tracing::error!(
                        integration_id = %self.integration_id,
                        source_id = %ack.source_id,
                        needs_attention = true,
                        "Error while saving event state: {e}"
                    );
                    return Err(e);
                }
                counter!("sync_events_created_total").increment(1);
                acked.push(ack);
            }
        }
        Ok(acked)
    }

    async fn submit_batch(
        &self,
        batch_no: usize,
        events: &[NormalizedEvent],
    ) -> SyncResult<Vec<EventAck>> {
        self.destination
            .submit_batch(events)
            .await
            .map_err(|source| SyncError::Submission {
                batch: batch_no,
                size: events.len(),
                source,
            })
    }

    async fn report_batch_failure(&self, err: &SyncError, events: &[NormalizedEvent]) {
        counter!("sync_batch_failures_total").increment(1);
        let source_ids: Vec<&str> = events.iter().map(|e| e.source_id.as_str()).collect();
        let msg = format!(
            "Destination returned error for integration_id: {}. {err}",
            self.integration_id
        );
        tracing::error!(
            integration_id = %self.integration_id,
            action_id = %self.options.action_id,
            needs_attention = true,
            source_ids = ?source_ids,
            "{msg}"
        );
        self.activity(
            LogLevel::Error,
            msg.clone(),
            json!({ "message": msg, "source_ids": source_ids, "events": events }),
        )
        .await;
    }

    async fn attach(
        &self,
        acks: &[EventAck],
        media_by_source: &HashMap<String, Vec<(u64, String)>>,
        summary: &mut RunSummary,
    ) {
        for ack in acks {
            let Some(items) = media_by_source.get(&ack.source_id).filter(|m| !m.is_empty())
            else {
                continue;
            };
            summary.events_with_attachments += 1;
            let outcome = transfer_event_media(
                self.media.as_ref(),
                self.destination.as_ref(),
                &ack.object_id,
                items,
            )
            .await;
            summary.photos_attached += outcome.transferred;

            for err in outcome.failures {
                let msg = format!(
                    "Error while processing event attachments for event ID '{}'. {err}",
                    ack.object_id
                );
                tracing::warn!(
                    integration_id = %self.integration_id,
                    source_id = %ack.source_id,
                    needs_attention = true,
                    "{msg}"
                );
                self.activity(
                    LogLevel::Warning,
                    msg.clone(),
                    json!({ "message": msg, "event_id": ack.object_id }),
                )
                .await;
            }
        }
    }

    async fn patch_one(&self, object_id: &str, record: &SourceRecord) -> SyncResult<()> {
        let event = transform(record, &self.config);
        self.destination
            .update_one(object_id, &event)
            .await
            .map_err(|source| SyncError::Patch {
                object_id: object_id.to_string(),
                source_id: event.source_id.clone(),
                source,
            })
    }

    /// Re-transform and update every previously-synced record. Returns the
    /// number of successful updates.
    async fn patch_all(&self, to_patch: &[(String, SourceRecord)]) -> usize {
        if to_patch.is_empty() {
            return 0;
        }
        tracing::info!(
            integration_id = %self.integration_id,
            "Updating {} events from observations",
            to_patch.len()
        );
        let mut updated = 0;
        for (object_id, record) in to_patch {
            match self.patch_one(object_id, record).await {
                Ok(()) => {
                    updated += 1;
                    counter!("sync_events_patched_total").increment(1);
                }
                Err(err) => {
                    counter!("sync_patch_failures_total").increment(1);
                    let msg = format!("Error while updating event '{object_id}'. {err}");
                    tracing::warn!(
                        integration_id = %self.integration_id,
                        needs_attention = true,
                        "{msg}"
                    );
                    self.activity(
                        LogLevel::Warning,
                        msg.clone(),
                        json!({ "message": msg, "event_id": object_id, "source_id": record.id }),
                    )
                    .await;
                }
            }
        }
        updated
    }

    async fn warn_nothing_to_process(&self) {
        let msg = format!(
            "No new iNaturalist observations to process for integration ID: {}.",
            self.integration_id
        );
        tracing::info!("{msg}");
        self.activity(LogLevel::Warning, msg.clone(), json!({ "message": msg }))
            .await;
    }

    async fn activity(&self, level: LogLevel, title: String, data: serde_json::Value) {
        self.activity
            .log(ActivityEntry {
                integration_id: self.integration_id.clone(),
                action_id: self.options.action_id.clone(),
                level,
                title,
                data,
            })
            .await;
    }
}
