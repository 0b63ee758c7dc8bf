use crate::config::RetryConfig;
use crate::error::SourceError;
use log::{debug, warn};
use rand::Rng;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn ceiling_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        self.ceiling_for_attempt(attempt_index).mul_f64(jitter)
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {}/{} failed: {e}; retrying in {delay:?}",
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.with_attempts(attempt + 1)),
            }
        }
    }
}

pub struct ApiClient {
    client: Client,
    provider: String,
    retry: RetryPolicy,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ApiClient {
    pub fn new(
        provider: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        request_interval: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            provider: provider.into(),
            retry,
            request_interval,
            last_request: Mutex::new(None),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        self.retry
            .run(|attempt| {
                let mut request = self.client.get(url).query(query);
                for (name, value) in headers {
                    request = request.header(*name, *value);
                }
                async move {
                    debug!("GET {url} attempt {}", attempt + 1);
                    self.send_once(request).await
                }
            })
            .await
    }

    async fn send_once<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SourceError> {
        self.pace().await;

        let response = request.send().await.map_err(|e| SourceError::Unavailable {
            provider: self.provider.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited {
                provider: self.provider.clone(),
                attempts: 1,
            });
        }
        if status.is_server_error() {
            return Err(SourceError::Unavailable {
                provider: self.provider.clone(),
                reason: format!("http status {status}"),
            });
        }
        if !status.is_success() {
            return Err(SourceError::InvalidResponse {
                provider: self.provider.clone(),
                reason: format!("http status {status}"),
            });
        }

        let body = response.bytes().await.map_err(|e| SourceError::Unavailable {
            provider: self.provider.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| SourceError::InvalidResponse {
            provider: self.provider.clone(),
            reason: e.to_string(),
        })
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.request_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
