pub mod birdeye;
pub mod coingecko;

use crate::config::{Config, SourceKind};
use crate::data::{CandidateToken, RawToken};
use crate::error::SourceError;
use crate::http::{ApiClient, RetryPolicy};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

pub use birdeye::BirdeyeSource;
pub use coingecko::GeckoSource;

#[async_trait]
pub trait TokenSource: Send + Sync {
    fn name(&self) -> &str;

    /// One page of the provider's listing, 1-based. An empty page ends the listing.
    async fn list_candidates(&self, page: u32) -> Result<Vec<CandidateToken>, SourceError>;

    /// `Ok(None)` means the asset has no contract on the target chain.
    async fn resolve_address(
        &self,
        candidate: &CandidateToken,
    ) -> Result<Option<String>, SourceError> {
        Ok(candidate.address.clone())
    }
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_candidates(&self, page: u32) -> Result<Vec<CandidateToken>, SourceError> {
        (**self).list_candidates(page).await
    }

    async fn resolve_address(
        &self,
        candidate: &CandidateToken,
    ) -> Result<Option<String>, SourceError> {
        (**self).resolve_address(candidate).await
    }
}

pub fn build_source(config: &Config, kind: SourceKind) -> anyhow::Result<Box<dyn TokenSource>> {
    config.source_enabled(kind)?;

    let api = ApiClient::new(
        kind.to_string(),
        config.http_timeout(),
        RetryPolicy::from(&config.retry),
        config.request_interval(),
    )?;

    let source: Box<dyn TokenSource> = match kind {
        SourceKind::Coingecko => Box::new(GeckoSource::new(
            api,
            config.coingecko.api_url.clone(),
            config.coingecko.api_key().map(str::to_string),
        )),
        SourceKind::Birdeye => Box::new(BirdeyeSource::new(
            api,
            config.birdeye.api_url.clone(),
            config.birdeye.api_key().unwrap_or_default().to_string(),
        )),
    };
    Ok(source)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub pages: u32,
    pub candidates: usize,
    pub unresolved: usize,
    pub source_errors: usize,
    pub rate_limited: bool,
    pub cancelled: bool,
}

pub struct TokenFeed<'a, S: TokenSource + ?Sized> {
    source: &'a S,
    cancel: CancellationToken,
    target: usize,
    max_pages: u32,
    next_page: u32,
    yielded: usize,
    finished: bool,
    stats: FeedStats,
}

impl<'a, S: TokenSource + ?Sized> TokenFeed<'a, S> {
    pub fn new(source: &'a S, target: usize, max_pages: u32, cancel: CancellationToken) -> Self {
        Self {
            source,
            cancel,
            target,
            max_pages,
            next_page: 1,
            yielded: 0,
            finished: false,
            stats: FeedStats::default(),
        }
    }

    pub fn into_stats(self) -> FeedStats {
        self.stats
    }

    pub async fn next_page(&mut self) -> Option<Vec<RawToken>> {
        if self.finished || self.yielded >= self.target || self.next_page > self.max_pages {
            self.finished = true;
            return None;
        }

        let page = self.next_page;
        self.next_page += 1;

        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.source.list_candidates(page) => Some(result),
        };
        let candidates = match listed {
            None => {
                self.stop_cancelled();
                return None;
            }
            Some(Err(e)) => {
                error!("Failed to list page {page} from {}: {e}", self.source.name());
                self.record_error(&e);
                self.finished = true;
                return None;
            }
            Some(Ok(candidates)) if candidates.is_empty() => {
                debug!("{} returned an empty page {page}", self.source.name());
                self.finished = true;
                return None;
            }
            Some(Ok(candidates)) => candidates,
        };

        self.stats.pages += 1;
        self.stats.candidates += candidates.len();
        debug!(
            "{} page {page}: {} candidates",
            self.source.name(),
            candidates.len()
        );

        let mut tokens = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.yielded >= self.target {
                break;
            }

            let resolved = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.source.resolve_address(&candidate) => Some(result),
            };
            match resolved {
                None => {
                    self.stop_cancelled();
                    break;
                }
                Some(Ok(Some(address))) => {
                    tokens.push(RawToken::from_candidate(candidate, address));
                    self.yielded += 1;
                }
                Some(Ok(None)) => {
                    debug!("No contract address for {}", candidate.provider_id);
                    self.stats.unresolved += 1;
                }
                Some(Err(e)) if e.is_rate_limited() => {
                    error!("Giving up on {}: {e}", self.source.name());
                    self.record_error(&e);
                    self.finished = true;
                    break;
                }
                Some(Err(e)) => {
                    warn!("Skipping {}: {e}", candidate.provider_id);
                    self.record_error(&e);
                }
            }
        }

        Some(tokens)
    }

    fn stop_cancelled(&mut self) {
        info!("Cancellation requested, stopping fetch from {}", self.source.name());
        self.stats.cancelled = true;
        self.finished = true;
    }

    fn record_error(&mut self, e: &SourceError) {
        self.stats.source_errors += 1;
        if e.is_rate_limited() {
            self.stats.rate_limited = true;
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub tokens: Vec<RawToken>,
    pub stats: FeedStats,
}

pub async fn collect_tokens<S: TokenSource + ?Sized>(
    source: &S,
    target: usize,
    max_pages: u32,
    cancel: CancellationToken,
) -> FetchOutcome {
    let mut feed = TokenFeed::new(source, target, max_pages, cancel);
    let mut tokens = Vec::new();
    while let Some(page) = feed.next_page().await {
        tokens.extend(page);
        info!("Collected {} tokens so far from {}", tokens.len(), source.name());
    }

    FetchOutcome {
        tokens,
        stats: feed.into_stats(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    pub struct ScriptedSource {
        pages: Mutex<VecDeque<Result<Vec<CandidateToken>, SourceError>>>,
        pub resolve_calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        pub fn new(pages: Vec<Result<Vec<CandidateToken>, SourceError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                resolve_calls: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn list_candidates(&self, _page: u32) -> Result<Vec<CandidateToken>, SourceError> {
            self.pages.lock().await.pop_front().unwrap_or(Ok(vec![]))
        }

        async fn resolve_address(
            &self,
            candidate: &CandidateToken,
        ) -> Result<Option<String>, SourceError> {
            self.resolve_calls
                .lock()
                .await
                .push(candidate.provider_id.clone());
            match candidate.provider_id.as_str() {
                "limited" => Err(SourceError::RateLimited {
                    provider: "scripted".into(),
                    attempts: 5,
                }),
                "broken" => Err(SourceError::InvalidResponse {
                    provider: "scripted".into(),
                    reason: "detail payload".into(),
                }),
                _ => Ok(candidate.address.clone()),
            }
        }
    }

    pub fn candidate(id: &str, address: Option<&str>, liquidity: f64) -> CandidateToken {
        CandidateToken {
            provider_id: id.to_string(),
            symbol: Some(id.to_string()),
            name: Some(format!("{id} token")),
            address: address.map(str::to_string),
            liquidity: Some(json!(liquidity)),
        }
    }

    pub fn evm_address(n: u8) -> String {
        format!("0x{:040x}", n)
    }
}
