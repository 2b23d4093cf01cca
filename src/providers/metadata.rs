use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ProviderEndpoint;
use crate::core::PartialSnapshot;
use crate::providers::{get_json, CooldownGate, Provider, ProviderError};

/// Client for the token metadata service, the richest of the providers.
/// It is the only source for holder concentration and LP burn figures.
pub struct MetadataClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    cooldown: CooldownGate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    symbol: Option<String>,
    name: Option<String>,
    decimals: Option<u8>,
    /// Unix millis.
    created_at: Option<i64>,
    mint_authority_active: Option<bool>,
    freeze_authority_active: Option<bool>,
    top10_holder_pct: Option<f64>,
    lp_burned_pct: Option<f64>,
}

impl MetadataClient {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            client: Client::new(),
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(endpoint.timeout_secs),
            cooldown: CooldownGate::new(endpoint.cooldown_secs),
        }
    }
}

#[async_trait]
impl Provider for MetadataClient {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn fetch(
        &self,
        chain: &str,
        address: &str,
    ) -> Result<Option<PartialSnapshot>, ProviderError> {
        self.cooldown.check().await?;
        let url = format!("{}/tokens/{chain}/{address}", self.base_url);
        let payload: Option<TokenPayload> =
            match get_json(&self.client, &url, self.timeout).await {
                Err(ProviderError::RateLimited { retry_after_secs }) => {
                    self.cooldown.arm(retry_after_secs).await;
                    return Err(ProviderError::RateLimited { retry_after_secs });
                }
                other => other?,
            };
        Ok(payload.map(partial_from_token))
    }
}

fn partial_from_token(p: TokenPayload) -> PartialSnapshot {
    PartialSnapshot {
        symbol: p.symbol,
        name: p.name,
        decimals: p.decimals,
        token_created_at: p.created_at.and_then(DateTime::from_timestamp_millis),
        top10_holder_pct: p.top10_holder_pct,
        mint_authority_active: p.mint_authority_active,
        freeze_authority_active: p.freeze_authority_active,
        lp_burned_pct: p.lp_burned_pct,
        ..Default::default()
    }
}
