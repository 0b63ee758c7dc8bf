use crate::data::CandidateToken;
use crate::error::SourceError;
use crate::http::ApiClient;
use crate::scraper::TokenSource;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const PAGE_LIMIT: u32 = 50;
const CHAIN: &str = "bsc";

#[derive(Debug, Deserialize)]
struct TokenListResponse {
    #[serde(default)]
    success: bool,
    data: Option<TokenListData>,
}

#[derive(Debug, Deserialize)]
struct TokenListData {
    #[serde(default)]
    tokens: Vec<BirdeyeToken>,
}

#[derive(Debug, Deserialize)]
struct BirdeyeToken {
    address: Option<String>,
    symbol: Option<String>,
    name: Option<String>,
    #[serde(rename = "v24hUSD")]
    volume_24h_usd: Option<Value>,
}

pub struct BirdeyeSource {
    api: ApiClient,
    base_api_url: String,
    api_key: String,
}

impl BirdeyeSource {
    pub fn new(api: ApiClient, base_url: String, api_key: String) -> Self {
        Self {
            api,
            base_api_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl TokenSource for BirdeyeSource {
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn list_candidates(&self, page: u32) -> Result<Vec<CandidateToken>, SourceError> {
        let base_url = &self.base_api_url;
        let url = format!("{base_url}/defi/tokenlist");
        let offset = page.saturating_sub(1) * PAGE_LIMIT;
        let query = [
            ("sort_by", "v24hUSD".to_string()),
            ("sort_type", "desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        let headers = [("X-API-KEY", self.api_key.as_str()), ("x-chain", CHAIN)];

        let response: TokenListResponse = self.api.get_json(&url, &headers, &query).await?;
        let data = match response.data {
            Some(data) if response.success => data,
            _ => {
                return Err(SourceError::InvalidResponse {
                    provider: self.name().to_string(),
                    reason: "token list request was not successful".to_string(),
                });
            }
        };

        Ok(data
            .tokens
            .into_iter()
            .map(|token| CandidateToken {
                provider_id: token.address.clone().unwrap_or_default(),
                symbol: token.symbol,
                name: token.name,
                address: token.address,
                liquidity: token.volume_24h_usd,
            })
            .collect())
    }
}
