use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::ProviderEndpoint;
use crate::core::PartialSnapshot;
use crate::providers::{CooldownGate, Provider, ProviderError};

/// JSON-RPC client for the chain node. Only consulted for authority
/// flags, which the node answers authoritatively where the aggregators
/// sometimes lag.
pub struct ChainRpcClient {
    client: Client,
    url: String,
    timeout: Duration,
    cooldown: CooldownGate,
}

impl ChainRpcClient {
    pub fn new(endpoint: &ProviderEndpoint) -> Self {
        Self {
            client: Client::new(),
            url: endpoint.url.clone(),
            timeout: Duration::from_secs(endpoint.timeout_secs),
            cooldown: CooldownGate::new(endpoint.cooldown_secs),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout)??;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: None,
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let json: Value = tokio::time::timeout(self.timeout, resp.json())
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
            return Err(ProviderError::Rpc(err.to_string()));
        }

        Ok(json["result"].clone())
    }
}

#[async_trait]
impl Provider for ChainRpcClient {
    fn name(&self) -> &'static str {
        "chain_rpc"
    }

    async fn fetch(
        &self,
        _chain: &str,
        address: &str,
    ) -> Result<Option<PartialSnapshot>, ProviderError> {
        self.cooldown.check().await?;
        let result = match self.call("getTokenAuthorities", vec![json!(address)]).await {
            Err(ProviderError::RateLimited { retry_after_secs }) => {
                self.cooldown.arm(retry_after_secs).await;
                return Err(ProviderError::RateLimited { retry_after_secs });
            }
            other => other?,
        };

        if result.is_null() {
            return Ok(None);
        }
        if !result.is_object() {
            return Err(ProviderError::Malformed(format!(
                "getTokenAuthorities returned {result}"
            )));
        }

        Ok(Some(PartialSnapshot {
            mint_authority_active: authority_flag(&result, "mintAuthority"),
            freeze_authority_active: authority_flag(&result, "freezeAuthority"),
            ..Default::default()
        }))
    }
}

/// An authority is active when the node reports a holder address for it;
/// an explicit null means revoked. A missing key stays unknown.
fn authority_flag(result: &Value, key: &str) -> Option<bool> {
    result.get(key).map(|v| !v.is_null())
}
