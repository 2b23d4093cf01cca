pub mod chain_rpc;
pub mod metadata;
pub mod pair_index;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::core::PartialSnapshot;

/// A single upstream data source. `fetch` returns `Ok(None)` when the
/// provider simply does not know the token; that is not an error.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        chain: &str,
        address: &str,
    ) -> Result<Option<PartialSnapshot>, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("cooling down after rate limit")]
    CoolingDown,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Per-provider cooldown window, armed when the upstream answers 429.
/// While the window is open every fetch short-circuits to `CoolingDown`
/// without touching the network; the next cycle after expiry goes through.
pub struct CooldownGate {
    until: Mutex<Option<Instant>>,
    default_secs: u64,
}

impl CooldownGate {
    pub fn new(default_secs: u64) -> Self {
        Self {
            until: Mutex::new(None),
            default_secs,
        }
    }

    pub async fn check(&self) -> Result<(), ProviderError> {
        let mut until = self.until.lock().await;
        match *until {
            Some(deadline) if Instant::now() < deadline => Err(ProviderError::CoolingDown),
            Some(_) => {
                *until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// The server's `Retry-After` wins over the configured default.
    pub async fn arm(&self, retry_after_secs: Option<u64>) {
        let secs = retry_after_secs.unwrap_or(self.default_secs);
        let mut until = self.until.lock().await;
        *until = Some(Instant::now() + Duration::from_secs(secs));
    }
}

/// GET a JSON endpoint with a hard deadline. Maps the status codes the
/// providers care about: 404 means "unknown token" (`Ok(None)`), 429
/// surfaces the `Retry-After` header, everything else non-2xx is `Status`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<Option<T>, ProviderError> {
    let resp = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| ProviderError::Timeout)??;

    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited {
            retry_after_secs: retry_after_secs(resp.headers()),
        });
    }
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }

    let body = tokio::time::timeout(timeout, resp.json::<T>())
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;
    Ok(Some(body))
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}
