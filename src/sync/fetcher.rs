// src/sync/fetcher.rs
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::collections::HashMap;

use crate::sync::annotations::{self, AnnotationRules};
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::types::{ObservationQuery, ObservationSource, SourceRecord};

pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Fields requested on every page; a superset of what the transformer reads.
pub const OBSERVATION_FIELDS: &[&str] = &[
    "observed_on",
    "created_at",
    "id",
    "captive",
    "obscured",
    "place_guess",
    "quality_grade",
    "species_guess",
    "updated_at",
    "uri",
    "photos",
    "user",
    "location",
    "place_ids",
    "taxon",
    "photos.id",
    "photos.url",
    "taxon.id",
    "taxon.rank",
    "taxon.name",
    "taxon.preferred_common_name",
    "taxon.wikipedia_url",
    "taxon.conservation_status",
    "taxon.ancestor_ids",
    "user.id",
    "user.name",
    "user.login",
    "annotations.controlled_attribute_id",
    "annotations.controlled_value_id",
];

/// Records keyed by id, in first-seen order. The first record inserted for an
/// id is kept; later duplicates are dropped whatever their timestamps.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<SourceRecord>,
    index: HashMap<u64, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, record: SourceRecord) -> bool {
        if self.index.contains_key(&record.id) {
            return false;
        }
        self.index.insert(record.id, self.records.len());
        self.records.push(record);
        true
    }

    pub fn get(&self, id: u64) -> Option<&SourceRecord> {
        self.index.get(&id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.records.iter()
    }

    pub fn into_vec(self) -> Vec<SourceRecord> {
        self.records
    }
}

/// Result of one pull window.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: RecordSet,
    /// Raw records returned by the source, duplicates and filtered ones included.
    pub fetched: usize,
    /// Records dropped by the annotation filter.
    pub filtered_out: usize,
    /// Newest `updated_at` over every fetched record.
    pub newest_update: Option<DateTime<Utc>>,
}

pub fn page_count(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size)) as u32
}

pub struct PaginatedFetcher<'a> {
    source: &'a dyn ObservationSource,
    page_size: u32,
}

impl<'a> PaginatedFetcher<'a> {
    pub fn new(source: &'a dyn ObservationSource) -> Self {
        Self {
            source,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pull every page of `query`. Any source error aborts the fetch.
    pub async fn fetch(
        &self,
        query: &ObservationQuery,
        rules: &AnnotationRules,
    ) -> SyncResult<FetchOutcome> {
        let t0 = std::time::Instant::now();

        let total = self
            .source
            .count(query)
            .await
            .map_err(|source| SyncError::Fetch {
                stage: "count".into(),
                source,
            })?;
        let pages = page_count(total, self.page_size);
        tracing::debug!(
            source = self.source.name(),
            total,
            pages,
            since = %query.updated_since,
            "source count"
        );

        let mut out = FetchOutcome::default();
        for page in 1..=pages {
            tracing::debug!("Loading page {page} of {pages} from {}", self.source.name());
            let batch = self
                .source
                .fetch_page(query, page, self.page_size, OBSERVATION_FIELDS)
                .await
                .map_err(|source| SyncError::Fetch {
                    stage: format!("page {page}"),
                    source,
                })?;
            tracing::info!(
                page,
                loaded = batch.len(),
                "loaded records before annotation filters"
            );

            for record in batch {
                out.fetched += 1;
                out.newest_update = Some(match out.newest_update {
                    Some(n) => n.max(record.updated_at),
                    None => record.updated_at,
                });
                if !rules.is_empty() && !annotations::matches(&record.annotations, rules) {
                    out.filtered_out += 1;
                    continue;
                }
                out.records.insert(record);
            }
        }

        histogram!("sync_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("sync_records_fetched_total").increment(out.fetched as u64);
        counter!("sync_records_filtered_total").increment(out.filtered_out as u64);
        Ok(out)
    }
}
