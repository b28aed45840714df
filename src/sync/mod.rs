// src/sync/mod.rs
pub mod activity;
pub mod annotations;
pub mod attachments;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod state;
pub mod transform;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use engine::{RunPhase, RunSummary, SyncEngine, SyncOptions};
pub use error::{SyncError, SyncResult};

/// One-time metrics registration (so series show up before the first increment).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "sync_records_fetched_total",
            "Raw records returned by the source, duplicates included."
        );
        describe_counter!(
            "sync_records_filtered_total",
            "Records dropped by annotation rules."
        );
        describe_counter!(
            "sync_events_created_total",
            "New events acknowledged by the destination."
        );
        describe_counter!(
            "sync_events_patched_total",
            "Previously-synced events updated."
        );
        describe_counter!(
            "sync_batch_failures_total",
            "Submission batches rejected as a whole."
        );
        describe_counter!("sync_patch_failures_total", "Event updates that failed.");
        describe_counter!(
            "sync_attachments_total",
            "Attachments accepted by the destination."
        );
        describe_counter!(
            "sync_attachment_failures_total",
            "Media downloads or uploads that failed."
        );
        describe_histogram!("sync_fetch_ms", "Full pagination time in milliseconds.");
        describe_gauge!("sync_last_run_ts", "Unix ts when a sync run last fetched.");
    });
}
