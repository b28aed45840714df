// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod providers;
pub mod sync;

// ---- Re-exports for stable public API ----
pub use crate::sync::{RunPhase, RunSummary, SyncEngine, SyncError, SyncOptions, SyncResult};

use std::sync::Arc;

use crate::config::AppConfig;
use crate::providers::{gundi::GundiClient, inaturalist::InatClient, media::HttpMediaFetcher};
use crate::sync::state::FileStateStore;

/// Wire the HTTP collaborators and the on-disk state store described by `cfg`.
pub fn engine_from_config(cfg: &AppConfig) -> anyhow::Result<SyncEngine> {
    let pull = cfg.pull_events.clone().validate()?;
    let source = InatClient::new(&cfg.source.base_url, cfg.source_timeout())?;
    let destination = GundiClient::new(
        &cfg.destination.base_url,
        &cfg.destination.api_key,
        cfg.destination_timeout(),
    )?;
    let media_client = reqwest::Client::builder()
        .timeout(cfg.destination_timeout())
        .build()?;
    let store = FileStateStore::new(cfg.state.path.clone());

    Ok(SyncEngine::new(
        cfg.integration.id.clone(),
        pull,
        Arc::new(source),
        Arc::new(destination),
        Arc::new(store),
    )
    .with_options(SyncOptions::default().with_action_id(cfg.integration.action_id.clone()))
    .with_media_fetcher(Arc::new(HttpMediaFetcher::new(media_client))))
}
