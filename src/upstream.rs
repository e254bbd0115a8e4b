use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ProviderError;

/// Retry, timeout and concurrency settings shared by every upstream call.
#[derive(Debug, Clone)]
pub struct UpstreamPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
    pub max_concurrent: usize,
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(250),
            max_concurrent: 8,
        }
    }
}

/// One HTTP client for OSRM, Overpass and TomTom.
///
/// Cloning is cheap; clones share the connection pool and the concurrency cap.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    permits: Arc<Semaphore>,
    policy: UpstreamPolicy,
}

impl UpstreamClient {
    pub fn new(policy: UpstreamPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(policy.timeout)
            .connect_timeout(policy.timeout)
            .user_agent(concat!("safepath/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(policy.max_concurrent.max(1))),
            policy,
        })
    }

    pub fn policy(&self) -> &UpstreamPolicy {
        &self.policy
    }

    /// Sends the request built by `build`, retrying retryable failures with
    /// linear backoff, and decodes the JSON body.
    pub async fn fetch_json<T, F>(&self, provider: &'static str, build: F) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = self.policy.retries.saturating_add(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match self.attempt(provider, &build).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.policy.backoff.saturating_mul(attempt + 1);
                    debug!(provider, attempt, ?delay, "retrying upstream call: {}", err);
                    last_err = Some(err);
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(provider, "upstream call failed: {}", err);
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or(ProviderError::InvalidResponse {
            provider,
            reason: "no attempt was made".to_string(),
        }))
    }

    /// One request, holding a concurrency permit until the body is decoded.
    async fn attempt<T, F>(&self, provider: &'static str, build: &F) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        // Never closed.
        let _permit = self.permits.acquire().await.map_err(|_| ProviderError::InvalidResponse {
            provider,
            reason: "upstream limiter closed".to_string(),
        })?;

        let response = build(&self.client)
            .send()
            .await
            .map_err(|source| ProviderError::Http { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider,
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|err| ProviderError::Parse {
            provider,
            reason: err.to_string(),
        })
    }

}
