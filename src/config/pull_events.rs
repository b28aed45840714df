// src/config/pull_events.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sync::annotations::AnnotationRules;
use crate::sync::error::{SyncError, SyncResult};

fn default_event_type() -> String {
    "inat_observation".to_string()
}
fn default_days_to_load() -> u32 {
    5
}
fn default_event_prefix() -> String {
    "iNat: ".to_string()
}
fn default_include_photos() -> bool {
    true
}

/// Pull-events settings as stored by the integration portal. Lists and maps
/// arrive as free-form strings; see [`PullEventsConfig`] for the checked form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPullEventsConfig {
    #[serde(default)]
    pub taxa: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    /// JSON string, e.g. `{"22": ["24", "25"], "1": ["2"]}`. Empty = no filter.
    #[serde(default)]
    pub annotations: String,
    /// `"[ne_lat, ne_lng, sw_lat, sw_lng]"`. Empty = no box.
    #[serde(default)]
    pub bounding_box: String,
    #[serde(default = "default_days_to_load")]
    pub days_to_load: u32,
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,
    #[serde(default)]
    pub quality_grade: Vec<String>,
    #[serde(default = "default_include_photos")]
    pub include_photos: bool,
}

impl Default for RawPullEventsConfig {
    fn default() -> Self {
        Self {
            taxa: Vec::new(),
            projects: Vec::new(),
            event_type: default_event_type(),
            annotations: String::new(),
            bounding_box: String::new(),
            days_to_load: default_days_to_load(),
            event_prefix: default_event_prefix(),
            quality_grade: Vec::new(),
            include_photos: default_include_photos(),
        }
    }
}

impl RawPullEventsConfig {
    /// Check and convert once at run entry.
    pub fn validate(self) -> SyncResult<PullEventsConfig> {
        PullEventsConfig::try_from(self).map_err(|e| SyncError::Config(format!("{e:#}")))
    }
}

/// Search area, north-east and south-west corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub ne_lat: f64,
    pub ne_lng: f64,
    pub sw_lat: f64,
    pub sw_lng: f64,
}

impl BoundingBox {
    /// Parse `"[ne_lat, ne_lng, sw_lat, sw_lng]"` (brackets optional).
    pub fn parse(s: &str) -> Result<Option<Self>> {
        let inner = s.trim().trim_start_matches('[').trim_end_matches(']').trim();
        if inner.is_empty() {
            return Ok(None);
        }
        let coords = inner
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .with_context(|| format!("bounding box coordinate {:?}", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        let [ne_lat, ne_lng, sw_lat, sw_lng] = coords[..] else {
            bail!("bounding box needs 4 coordinates, got {}", coords.len());
        };
        for lat in [ne_lat, sw_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                bail!("bounding box latitude {lat} out of range");
            }
        }
        for lng in [ne_lng, sw_lng] {
            if !(-180.0..=180.0).contains(&lng) {
                bail!("bounding box longitude {lng} out of range");
            }
        }
        Ok(Some(Self {
            ne_lat,
            ne_lng,
            sw_lat,
            sw_lng,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Casual,
    NeedsId,
    Research,
}

impl QualityGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::Casual => "casual",
            QualityGrade::NeedsId => "needs_id",
            QualityGrade::Research => "research",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityGrade {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "casual" => Ok(QualityGrade::Casual),
            "needs_id" => Ok(QualityGrade::NeedsId),
            "research" => Ok(QualityGrade::Research),
            other => Err(anyhow!("unknown quality grade {other:?}")),
        }
    }
}

/// Validated pull-events settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PullEventsConfig {
    pub bounding_box: Option<BoundingBox>,
    pub taxa: Vec<u64>,
    pub projects: Vec<String>,
    pub annotations: AnnotationRules,
    pub days_to_load: u32,
    pub event_type: String,
    pub event_prefix: String,
    pub quality_grades: Vec<QualityGrade>,
    pub include_photos: bool,
}

impl Default for PullEventsConfig {
    fn default() -> Self {
        Self {
            bounding_box: None,
            taxa: Vec::new(),
            projects: Vec::new(),
            annotations: AnnotationRules::default(),
            days_to_load: default_days_to_load(),
            event_type: default_event_type(),
            event_prefix: default_event_prefix(),
            quality_grades: Vec::new(),
            include_photos: default_include_photos(),
        }
    }
}

impl TryFrom<RawPullEventsConfig> for PullEventsConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawPullEventsConfig) -> Result<Self> {
        let taxa = raw
            .taxa
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<u64>().with_context(|| format!("taxon id {t:?}")))
            .collect::<Result<Vec<_>>>()?;
        let projects = raw
            .projects
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let quality_grades = raw
            .quality_grade
            .iter()
            .filter(|q| !q.trim().is_empty())
            .map(|q| q.parse())
            .collect::<Result<Vec<_>>>()?;
        let event_type = raw.event_type.trim().to_string();
        if event_type.is_empty() {
            bail!("event_type must not be empty");
        }

        Ok(Self {
            bounding_box: BoundingBox::parse(&raw.bounding_box)?,
            taxa,
            projects,
            annotations: AnnotationRules::parse(&raw.annotations)?,
            days_to_load: raw.days_to_load,
            event_type,
            event_prefix: raw.event_prefix,
            quality_grades,
            include_photos: raw.include_photos,
        })
    }
}
