// src/providers/media.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::sync::types::MediaFetcher;

/// Plain GET download; non-2xx is an error.
#[derive(Clone, Default)]
pub struct HttpMediaFetcher {
    client: Client,
}

impl HttpMediaFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("media get {url}"))?
            .error_for_status()
            .with_context(|| format!("media non-2xx {url}"))?;
        let bytes = resp.bytes().await.context("media body")?;
        Ok(bytes.to_vec())
    }
}
