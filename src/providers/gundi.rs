// src/providers/gundi.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

use crate::sync::types::{Attachment, EventAck, EventDestination, NormalizedEvent};

#[derive(Debug, Clone, Deserialize)]
struct CreatedEvent {
    object_id: String,
}

/// The sensors API answers a single object for one event and a list otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateResponse {
    Many(Vec<CreatedEvent>),
    One(CreatedEvent),
}

impl CreateResponse {
    fn into_vec(self) -> Vec<CreatedEvent> {
        match self {
            CreateResponse::Many(v) => v,
            CreateResponse::One(e) => vec![e],
        }
    }
}

/// The destination acknowledges in submission order; pair each created object
/// with the event at the same position.
fn correlate(events: &[NormalizedEvent], created: Vec<CreatedEvent>) -> Vec<EventAck> {
    if created.len() != events.len() {
        tracing::warn!(
            sent = events.len(),
            acked = created.len(),
            "destination acknowledged a different number of events"
        );
    }
    events
        .iter()
        .zip(created)
        .map(|(ev, c)| EventAck {
            source_id: ev.source_id.clone(),
            object_id: c.object_id,
        })
        .collect()
}

/// Gundi sensors API client (v2 events).
pub struct GundiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GundiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building gundi http client")?;
        Ok(Self::with_client(base_url, api_key, client))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    fn events_url(&self) -> String {
        format!("{}/v2/events/", self.base_url)
    }

    fn event_url(&self, object_id: &str) -> String {
        format!("{}/v2/events/{}/", self.base_url, object_id)
    }
}

#[async_trait]
impl EventDestination for GundiClient {
    async fn submit_batch(&self, events: &[NormalizedEvent]) -> Result<Vec<EventAck>> {
        let resp = self
            .client
            .post(self.events_url())
            .header("apikey", &self.api_key)
            .json(events)
            .send()
            .await
            .context("gundi post events")?
            .error_for_status()
            .context("gundi post events non-2xx")?;
        let created: CreateResponse = resp.json().await.context("parsing gundi events response")?;
        Ok(correlate(events, created.into_vec()))
    }

    async fn update_one(&self, object_id: &str, event: &NormalizedEvent) -> Result<()> {
        self.client
            .patch(self.event_url(object_id))
            .header("apikey", &self.api_key)
            .json(event)
            .send()
            .await
            .context("gundi patch event")?
            .error_for_status()
            .context("gundi patch event non-2xx")?;
        Ok(())
    }

    async fn upload_attachments(&self, object_id: &str, files: Vec<Attachment>) -> Result<()> {
        let mut form = Form::new();
        for f in files {
            let part = Part::bytes(f.content).file_name(f.filename.clone());
            form = form.part(f.filename, part);
        }
        self.client
            .post(format!("{}attachments/", self.event_url(object_id)))
            .header("apikey", &self.api_key)
            .multipart(form)
            .send()
            .await
            .context("gundi post attachments")?
            .error_for_status()
            .context("gundi post attachments non-2xx")?;
        Ok(())
    }
}
