// tests/metrics_sync.rs
#![cfg(feature = "strict-metrics")]
mod common;

use common::*;
use metrics_exporter_prometheus::PrometheusBuilder;

use inat_sync::config::PullEventsConfig;
use inat_sync::SyncOptions;

#[tokio::test]
async fn metrics_exposed_after_run() {
    // Install a local recorder for the test
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let destination = MockDestination {
        fail_updates: ["evt-2".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let h = Harness::new(
        MockSource::paged(
            vec![
                with_photos(record(1, ts(2, 0)), &[11]),
                record(2, ts(2, 1)),
            ],
            200,
        ),
        destination,
    );
    seed_sync_record(&h.store, 2, "evt-2").await;

    h.engine(PullEventsConfig::default(), SyncOptions::default())
        .run_at(ts(10, 0))
        .await
        .unwrap();

    // Scrape metrics text and check series presence by substring
    let out = handle.render();
    for series in [
        "sync_records_fetched_total",
        "sync_events_created_total",
        "sync_patch_failures_total",
        "sync_attachments_total",
        "sync_fetch_ms",
        "sync_last_run_ts",
    ] {
        assert!(out.contains(series), "missing {series}");
    }
}
