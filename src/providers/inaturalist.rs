// src/providers/inaturalist.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Deserialize;
use std::time::Duration;

use crate::sync::types::{ObservationQuery, ObservationSource, SourceRecord};

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    total_results: u64,
    #[serde(default)]
    results: Vec<SourceRecord>,
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Query string shared by the count and page requests.
pub fn query_params(query: &ObservationQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        (
            "updated_since",
            query
                .updated_since
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("order_by", "updated_at".to_string()),
        ("order", "asc".to_string()),
    ];
    if !query.taxon_ids.is_empty() {
        params.push(("taxon_id", join(&query.taxon_ids)));
    }
    if !query.project_ids.is_empty() {
        params.push(("project_id", query.project_ids.join(",")));
    }
    if !query.quality_grades.is_empty() {
        params.push(("quality_grade", join(&query.quality_grades)));
    }
    if let Some(bb) = query.bounding_box {
        params.push(("nelat", bb.ne_lat.to_string()));
        params.push(("nelng", bb.ne_lng.to_string()));
        params.push(("swlat", bb.sw_lat.to_string()));
        params.push(("swlng", bb.sw_lng.to_string()));
    }
    params
}

/// iNaturalist observations API (v2).
pub struct InatClient {
    base_url: String,
    client: reqwest::Client,
}

impl InatClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("inat-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building iNaturalist http client")?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<ObservationsResponse> {
        let url = format!("{}/observations", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .context("inaturalist get()")?
            .error_for_status()
            .context("inaturalist non-2xx")?;
        resp.json::<ObservationsResponse>()
            .await
            .context("parsing inaturalist observations json")
    }
}

#[async_trait]
impl ObservationSource for InatClient {
    async fn count(&self, query: &ObservationQuery) -> Result<u64> {
        let mut params = query_params(query);
        params.push(("page", "1".into()));
        params.push(("per_page", "0".into()));
        Ok(self.get(&params).await?.total_results)
    }

    async fn fetch_page(
        &self,
        query: &ObservationQuery,
        page: u32,
        per_page: u32,
        fields: &[&str],
    ) -> Result<Vec<SourceRecord>> {
        let mut params = query_params(query);
        params.push(("page", page.to_string()));
        params.push(("per_page", per_page.to_string()));
        params.push(("fields", fields.join(",")));
        Ok(self.get(&params).await?.results)
    }

    fn name(&self) -> &'static str {
        "iNaturalist"
    }
}
