use crate::data::CandidateToken;
use crate::error::SourceError;
use crate::http::ApiClient;
use crate::scraper::TokenSource;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const BSC_CATEGORY: &str = "binance-smart-chain";
pub const BSC_PLATFORM: &str = "binance-smart-chain";
const PER_PAGE: u32 = 250;
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: Option<String>,
    name: Option<String>,
    total_volume: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    #[serde(default)]
    platforms: HashMap<String, Option<String>>,
}

pub struct GeckoSource {
    api: ApiClient,
    base_api_url: String,
    api_key: Option<String>,
    per_page: u32,
}

impl GeckoSource {
    pub fn new(api: ApiClient, base_url: String, api_key: Option<String>) -> Self {
        Self {
            api,
            base_api_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            per_page: PER_PAGE,
        }
    }

    #[cfg(test)]
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    fn headers(&self) -> Vec<(&str, &str)> {
        match &self.api_key {
            Some(key) => vec![(API_KEY_HEADER, key.as_str())],
            None => vec![],
        }
    }
}

#[async_trait]
impl TokenSource for GeckoSource {
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn list_candidates(&self, page: u32) -> Result<Vec<CandidateToken>, SourceError> {
        let base_url = &self.base_api_url;
        let url = format!("{base_url}/api/v3/coins/markets");
        let query = [
            ("vs_currency", "usd".to_string()),
            ("category", BSC_CATEGORY.to_string()),
            ("order", "volume_desc".to_string()),
            ("per_page", self.per_page.to_string()),
            ("page", page.to_string()),
            ("sparkline", "false".to_string()),
        ];

        let entries: Vec<MarketEntry> = self.api.get_json(&url, &self.headers(), &query).await?;

        Ok(entries
            .into_iter()
            .map(|entry| CandidateToken {
                provider_id: entry.id,
                symbol: entry.symbol,
                name: entry.name,
                address: None,
                liquidity: entry.total_volume,
            })
            .collect())
    }

    async fn resolve_address(
        &self,
        candidate: &CandidateToken,
    ) -> Result<Option<String>, SourceError> {
        if candidate.address.is_some() {
            return Ok(candidate.address.clone());
        }

        let base_url = &self.base_api_url;
        let coin_id = &candidate.provider_id;
        let url = format!("{base_url}/api/v3/coins/{coin_id}");
        let query = [
            ("localization", "false".to_string()),
            ("tickers", "false".to_string()),
            ("market_data", "false".to_string()),
            ("community_data", "false".to_string()),
            ("developer_data", "false".to_string()),
            ("sparkline", "false".to_string()),
        ];

        let detail: CoinDetail = self.api.get_json(&url, &self.headers(), &query).await?;

        Ok(detail
            .platforms
            .get(BSC_PLATFORM)
            .and_then(|address| address.as_deref())
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string))
    }
}
