//! PostgREST-compatible HTTP sink (`POST {base}/rest/v1/{table}` with a JSON
//! array body), as exposed by Supabase.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::RemoteRejected;
use crate::types::LocationRecord;

use super::RemoteSink;

pub struct PostgrestSink {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl PostgrestSink {
    pub fn new(base_url: &str, table: &str, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(&config.base_url, &config.table, config.api_key.clone())
    }

    /// Use a preconfigured client (proxies, TLS roots, timeouts).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteSink for PostgrestSink {
    async fn insert_batch(&self, records: &[LocationRecord]) -> Result<(), RemoteRejected> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .json(records)
            .send()
            .await
            .map_err(|e| RemoteRejected::new(format!("transport error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(count = records.len(), %status, "batch inserted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%status, body = %body, "batch insert rejected");
        Err(RemoteRejected::new(format!("{status}: {body}")))
    }
}
