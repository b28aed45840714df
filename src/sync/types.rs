// src/sync/types.rs
use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{BoundingBox, QualityGrade};

/// One observation as returned by the source API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub observed_on: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lat_lon")]
    pub location: Option<(f64, f64)>,
    #[serde(default)]
    pub captive: Option<bool>,
    #[serde(default)]
    pub obscured: Option<bool>,
    #[serde(default)]
    pub place_guess: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default)]
    pub species_guess: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<SourceUser>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub place_ids: Vec<u64>,
    #[serde(default)]
    pub taxon: Option<Taxon>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub photos: Vec<Photo>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceUser {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Taxon {
    pub id: u64,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub wikipedia_url: Option<String>,
    #[serde(default)]
    pub conservation_status: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ancestor_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Photo {
    pub id: u64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub large_url: Option<String>,
}

impl Photo {
    /// Large rendition. The v2 API only returns the square `url`, so the large
    /// one is derived by swapping the size segment.
    pub fn best_url(&self) -> Option<String> {
        if let Some(large) = self.large_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(large.to_string());
        }
        let url = self.url.as_deref().filter(|u| !u.is_empty())?;
        Some(url.replacen("/square.", "/large.", 1))
    }
}

/// Controlled-vocabulary annotation: (attribute id, value id).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotation {
    pub controlled_attribute_id: u64,
    pub controlled_value_id: u64,
}

impl SourceRecord {
    /// Ordered `(media id, url)` pairs for the attachment pipeline.
    pub fn media_refs(&self) -> Vec<(u64, String)> {
        self.photos
            .iter()
            .filter_map(|p| p.best_url().map(|u| (p.id, u)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Event shape submitted to the destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedEvent {
    /// Source record id this event was built from. Also present as
    /// `event_details.inat_id`.
    #[serde(skip)]
    pub source_id: String,
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub event_details: serde_json::Map<String, serde_json::Value>,
}

/// Destination acknowledgement for one created event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAck {
    pub source_id: String,
    pub object_id: String,
}

/// One file ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Server-side filters for one pull window.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationQuery {
    pub updated_since: DateTime<Utc>,
    pub bounding_box: Option<BoundingBox>,
    pub taxon_ids: Vec<u64>,
    pub project_ids: Vec<String>,
    pub quality_grades: Vec<QualityGrade>,
}

#[async_trait::async_trait]
pub trait ObservationSource: Send + Sync {
    /// Total number of records matching `query`.
    async fn count(&self, query: &ObservationQuery) -> Result<u64>;
    /// One page (1-based), ascending by `updated_at`.
    async fn fetch_page(
        &self,
        query: &ObservationQuery,
        page: u32,
        per_page: u32,
        fields: &[&str],
    ) -> Result<Vec<SourceRecord>>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait EventDestination: Send + Sync {
    async fn submit_batch(&self, events: &[NormalizedEvent]) -> Result<Vec<EventAck>>;
    async fn update_one(&self, object_id: &str, event: &NormalizedEvent) -> Result<()>;
    async fn upload_attachments(&self, object_id: &str, files: Vec<Attachment>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Parse source timestamps: RFC 3339 (converted to UTC), naive date-time
/// (taken as UTC) or a bare date (midnight UTC).
pub fn parse_source_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_source_timestamp))
}

fn lat_lon<'de, D>(d: D) -> Result<Option<(f64, f64)>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Pair([f64; 2]),
        Text(String),
    }

    let raw: Option<Raw> = Option::deserialize(d)?;
    Ok(match raw {
        None => None,
        Some(Raw::Pair([lat, lon])) => Some((lat, lon)),
        Some(Raw::Text(s)) => {
            let mut parts = s.split(',').map(|p| p.trim().parse::<f64>());
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(lat)), Some(Ok(lon)), None) => Some((lat, lon)),
                _ => None,
            }
        }
    })
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
