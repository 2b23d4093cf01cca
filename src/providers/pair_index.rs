use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderEndpoint;
use crate::core::PartialSnapshot;
use crate::providers::{get_json, CooldownGate, Provider, ProviderError};

/// Client for the DEX pair index. Doubles as the discovery feed
/// (`latest_pairs`) and as an enrichment provider for per-token lookups.
pub struct PairIndexClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    cooldown: CooldownGate,
}

/// One trading pair as the index reports it. Timestamps are unix millis.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairPayload {
    base_address: String,
    base_symbol: Option<String>,
    base_name: Option<String>,
    liquidity_usd: Option<f64>,
    pair_created_at: Option<i64>,
}

impl PairIndexClient {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            client: Client::new(),
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(endpoint.timeout_secs),
            cooldown: CooldownGate::new(endpoint.cooldown_secs),
        }
    }

    /// Base-token addresses of recently created pairs, newest first as the
    /// index returns them. Duplicates are possible when one token backs
    /// several pairs; the caller dedups.
    pub async fn latest_pairs(&self, chain: &str) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/pairs/{chain}/recent", self.base_url);
        let payloads: Option<Vec<PairPayload>> = self.get(&url).await?;
        Ok(payloads
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.base_address)
            .collect())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ProviderError> {
        self.cooldown.check().await?;
        match get_json(&self.client, url, self.timeout).await {
            Err(ProviderError::RateLimited { retry_after_secs }) => {
                self.cooldown.arm(retry_after_secs).await;
                Err(ProviderError::RateLimited { retry_after_secs })
            }
            other => other,
        }
    }
}

#[async_trait]
impl Provider for PairIndexClient {
    fn name(&self) -> &'static str {
        "pair_index"
    }

    async fn fetch(
        &self,
        chain: &str,
        address: &str,
    ) -> Result<Option<PartialSnapshot>, ProviderError> {
        let url = format!("{}/pairs/{chain}/{address}", self.base_url);
        let payload: Option<PairPayload> = self.get(&url).await?;
        Ok(payload.map(partial_from_pair))
    }
}

fn partial_from_pair(p: PairPayload) -> PartialSnapshot {
    PartialSnapshot {
        symbol: p.base_symbol,
        name: p.base_name,
        liquidity_usd: p.liquidity_usd,
        // The pair's creation is the earliest moment the index saw the
        // token trading; out-of-range millis are dropped, not zeroed.
        token_created_at: p.pair_created_at.and_then(DateTime::from_timestamp_millis),
        ..Default::default()
    }
}
