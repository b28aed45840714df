//! inat-sync — one pull-events pass.
//! Loads config, runs the sync engine once and prints the run summary as JSON.
//! A fatal run error (source fetch, state store) exits non-zero.

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inat_sync=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = inat_sync::config::load_default().context("loading inat-sync config")?;
    let engine = inat_sync::engine_from_config(&cfg)?;

    let summary = engine.run().await?;
    println!("{}", serde_json::json!({ "result": summary }));
    Ok(())
}
