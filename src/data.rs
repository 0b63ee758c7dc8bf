use bigdecimal::BigDecimal;
use serde_json::Value;

pub const NAME_MAX_CHARS: usize = 200;
pub const SYMBOL_MAX_CHARS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSpec {
    pub network: String,
    pub address_prefix: String,
    pub address_len: usize,
}

impl ChainSpec {
    pub fn evm(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            address_prefix: "0x".to_string(),
            address_len: 42,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateToken {
    pub provider_id: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub liquidity: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawToken {
    pub address: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub liquidity: Option<Value>,
}

impl RawToken {
    pub fn from_candidate(candidate: CandidateToken, address: String) -> Self {
        Self {
            address: Some(address),
            symbol: candidate.symbol,
            name: candidate.name,
            liquidity: candidate.liquidity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub network: String,
    pub name: String,
    pub symbol: String,
    pub liquidity_usd: BigDecimal,
    pub token_address: String,
}
