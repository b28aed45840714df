// src/sync/attachments.rs
use anyhow::anyhow;
use metrics::counter;

use crate::sync::error::SyncError;
use crate::sync::types::{Attachment, EventDestination, MediaFetcher};

/// What happened to one event's media.
#[derive(Debug, Default)]
pub struct AttachmentOutcome {
    /// Files accepted by the destination.
    pub transferred: usize,
    /// Per-item and per-upload failures, in order of occurrence.
    pub failures: Vec<SyncError>,
}

/// `<media id>.<extension of the URL path>`; `None` when the path has no extension.
pub fn attachment_filename(media_id: u64, url: &str) -> Option<String> {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!("{media_id}.{ext}"))
}

/// Download every media item for one event and upload the ones that arrived
/// in a single call. Failures never escape; they are returned in the outcome.
pub async fn transfer_event_media(
    media: &dyn MediaFetcher,
    destination: &dyn EventDestination,
    object_id: &str,
    items: &[(u64, String)],
) -> AttachmentOutcome {
    let mut outcome = AttachmentOutcome::default();
    let mut files = Vec::with_capacity(items.len());

    for (media_id, url) in items {
        let Some(filename) = attachment_filename(*media_id, url) else {
            outcome.failures.push(SyncError::Attachment {
                object_id: object_id.to_string(),
                what: format!("filename {url}"),
                source: anyhow!("url has no file extension"),
            });
            continue;
        };
        tracing::info!(url = %url, object_id, "adding media to event");
        match media.fetch(url).await {
            Ok(content) => files.push(Attachment { filename, content }),
            Err(source) => outcome.failures.push(SyncError::Attachment {
                object_id: object_id.to_string(),
                what: format!("download {url}"),
                source,
            }),
        }
    }

    if !files.is_empty() {
        let n = files.len();
        match destination.upload_attachments(object_id, files).await {
            Ok(()) => outcome.transferred = n,
            Err(source) => outcome.failures.push(SyncError::Attachment {
                object_id: object_id.to_string(),
                what: "upload".into(),
                source,
            }),
        }
    }

    counter!("sync_attachments_total").increment(outcome.transferred as u64);
    counter!("sync_attachment_failures_total").increment(outcome.failures.len() as u64);
    outcome
}
