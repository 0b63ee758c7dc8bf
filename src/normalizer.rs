use crate::data::{ChainSpec, NAME_MAX_CHARS, RawToken, SYMBOL_MAX_CHARS, TokenRecord};
use bigdecimal::{BigDecimal, FromPrimitive, Zero};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejected {
    MissingAddress,
    MalformedAddress(String),
}

impl Display for Rejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejected::MissingAddress => f.write_str("missing contract address"),
            Rejected::MalformedAddress(address) => write!(f, "malformed contract address {address:?}"),
        }
    }
}

pub fn normalize(raw: &RawToken, chain: &ChainSpec) -> Result<TokenRecord, Rejected> {
    let address = raw
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or(Rejected::MissingAddress)?;
    let token_address = normalize_address(address, chain)
        .ok_or_else(|| Rejected::MalformedAddress(address.to_string()))?;

    Ok(TokenRecord {
        network: chain.network.clone(),
        name: truncate_chars(raw.name.as_deref().unwrap_or_default().trim(), NAME_MAX_CHARS),
        symbol: truncate_chars(
            &raw.symbol.as_deref().unwrap_or_default().trim().to_uppercase(),
            SYMBOL_MAX_CHARS,
        ),
        liquidity_usd: coerce_liquidity(raw.liquidity.as_ref()),
        token_address,
    })
}

pub fn normalize_address(address: &str, chain: &ChainSpec) -> Option<String> {
    let lowered = address.to_ascii_lowercase();
    let body = lowered.strip_prefix(&chain.address_prefix.to_ascii_lowercase())?;
    if lowered.len() != chain.address_len || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(lowered)
}

const LIQUIDITY_SCALE: i64 = 18;
const LIQUIDITY_MAX_INTEGER_DIGITS: i64 = 1_000;

/// Numbers and numeric strings become decimals; anything else, a negative value
/// or a magnitude NUMERIC cannot store, is zero. Fractions are truncated to 18 places.
pub fn coerce_liquidity(value: Option<&Value>) -> BigDecimal {
    let parsed = match value {
        Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(BigDecimal::from_f64)),
        Some(Value::String(s)) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    };

    match parsed {
        Some(amount) if amount > BigDecimal::zero() => fit_numeric(amount),
        _ => BigDecimal::zero(),
    }
}

fn fit_numeric(amount: BigDecimal) -> BigDecimal {
    let (digits, scale) = amount.as_bigint_and_exponent();
    let integer_digits = digits.to_string().len() as i64 - scale;
    if integer_digits > LIQUIDITY_MAX_INTEGER_DIGITS || integer_digits < -LIQUIDITY_SCALE {
        return BigDecimal::zero();
    }
    if scale > LIQUIDITY_SCALE {
        amount.with_scale(LIQUIDITY_SCALE)
    } else if scale < 0 {
        amount.with_scale(0)
    } else {
        amount
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<TokenRecord>,
    pub rejected: Vec<(RawToken, Rejected)>,
    pub duplicates: usize,
}

pub fn normalize_batch(raws: Vec<RawToken>, chain: &ChainSpec) -> NormalizedBatch {
    let mut accepted = Vec::with_capacity(raws.len());
    let mut rejected = Vec::new();

    for raw in raws {
        match normalize(&raw, chain) {
            Ok(record) => accepted.push(record),
            Err(reason) => rejected.push((raw, reason)),
        }
    }

    let (records, duplicates) = dedupe_by_address(accepted);
    NormalizedBatch {
        records,
        rejected,
        duplicates,
    }
}

/// Keeps the last record seen for each address, at the position of its first
/// occurrence. Returns the survivors and how many records were collapsed.
pub fn dedupe_by_address(records: Vec<TokenRecord>) -> (Vec<TokenRecord>, usize) {
    let mut unique: Vec<TokenRecord> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut duplicates = 0;

    for record in records {
        match positions.get(&record.token_address) {
            Some(&index) => {
                unique[index] = record;
                duplicates += 1;
            }
            None => {
                positions.insert(record.token_address.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    (unique, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WBNB: &str = "0xBB4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c";

    fn raw(address: Option<&str>, symbol: &str, name: &str, liquidity: Value) -> RawToken {
        RawToken {
            address: address.map(str::to_string),
            symbol: Some(symbol.to_string()),
            name: Some(name.to_string()),
            liquidity: Some(liquidity),
        }
    }

    fn bsc() -> ChainSpec {
        ChainSpec::evm("BSC")
    }

    #[test]
    fn wrapped_bnb_is_upper_cased_and_lower_addressed() {
        let record = normalize(
            &raw(Some(WBNB), "wbnb", "Wrapped BNB", json!(2500000000u64)),
            &bsc(),
        )
        .unwrap();

        assert_eq!(record.symbol, "WBNB");
        assert_eq!(record.name, "Wrapped BNB");
        assert_eq!(record.token_address, WBNB.to_lowercase());
        assert_eq!(record.network, "BSC");
        assert_eq!(record.liquidity_usd, BigDecimal::from(2_500_000_000u64));
    }

    #[test]
    fn missing_or_malformed_addresses_are_rejected() {
        let chain = bsc();
        let cases = [
            (None, Rejected::MissingAddress),
            (Some("   "), Rejected::MissingAddress),
            (
                Some("bb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c00"),
                Rejected::MalformedAddress("bb4cdb9cbd36b01bd1cbaebf2de08d9173bc095c00".into()),
            ),
            (Some("0x1234"), Rejected::MalformedAddress("0x1234".into())),
            (
                Some("0xZZ4cdb9cbd36b01bd1cbaebf2de08d9173bc095c"),
                Rejected::MalformedAddress("0xZZ4cdb9cbd36b01bd1cbaebf2de08d9173bc095c".into()),
            ),
            (
                Some("So11111111111111111111111111111111111111112"),
                Rejected::MalformedAddress("So11111111111111111111111111111111111111112".into()),
            ),
        ];

        for (address, expected) in cases {
            let result = normalize(&raw(address, "x", "x", json!(1)), &chain);
            assert_eq!(result, Err(expected));
        }
    }

    #[test]
    fn long_fields_are_truncated_by_characters() {
        let long_symbol = "é".repeat(80);
        let long_name = "n".repeat(500);
        let record = normalize(&raw(Some(WBNB), &long_symbol, &long_name, json!(1)), &bsc()).unwrap();

        assert_eq!(record.symbol.chars().count(), SYMBOL_MAX_CHARS);
        assert_eq!(record.symbol, "É".repeat(SYMBOL_MAX_CHARS));
        assert_eq!(record.name.chars().count(), NAME_MAX_CHARS);
    }

    #[test]
    fn missing_text_fields_become_empty() {
        let token = RawToken {
            address: Some(WBNB.to_string()),
            ..RawToken::default()
        };
        let record = normalize(&token, &bsc()).unwrap();

        assert_eq!(record.symbol, "");
        assert_eq!(record.name, "");
        assert_eq!(record.liquidity_usd, BigDecimal::zero());
    }

    #[test]
    fn liquidity_is_coerced() {
        assert_eq!(
            coerce_liquidity(Some(&json!("1234.50"))),
            BigDecimal::from_str("1234.50").unwrap()
        );
        assert_eq!(
            coerce_liquidity(Some(&json!(0.25))),
            BigDecimal::from_str("0.25").unwrap()
        );
        assert_eq!(coerce_liquidity(Some(&json!("n/a"))), BigDecimal::zero());
        assert_eq!(coerce_liquidity(Some(&json!(-5))), BigDecimal::zero());
        assert_eq!(coerce_liquidity(Some(&json!(null))), BigDecimal::zero());
        assert_eq!(coerce_liquidity(Some(&json!({"usd": 1}))), BigDecimal::zero());
        assert_eq!(coerce_liquidity(None), BigDecimal::zero());
    }

    #[test]
    fn liquidity_outside_numeric_range_is_zero() {
        assert_eq!(coerce_liquidity(Some(&json!("1e200000"))), BigDecimal::zero());
        assert_eq!(coerce_liquidity(Some(&json!("1e-70000"))), BigDecimal::zero());

        let (_, scale) = coerce_liquidity(Some(&json!("1e200000"))).as_bigint_and_exponent();
        assert!(scale.abs() <= LIQUIDITY_SCALE);
    }

    #[test]
    fn liquidity_is_truncated_to_storable_scale() {
        let fine = coerce_liquidity(Some(&json!("0.1234567890123456789012")));
        assert_eq!(fine, BigDecimal::from_str("0.123456789012345678").unwrap());
        assert_eq!(fine.as_bigint_and_exponent().1, LIQUIDITY_SCALE);

        let exponent = coerce_liquidity(Some(&json!("2.5e3")));
        assert_eq!(exponent, BigDecimal::from(2500));
        assert_eq!(exponent.as_bigint_and_exponent().1, 0);
    }

    #[test]
    fn batch_keeps_last_write_for_duplicate_addresses() {
        let other = "0x0e09fabb73bd3ade0a17ecc321fd13a19e81ce82";
        let batch = normalize_batch(
            vec![
                raw(Some(WBNB), "wbnb", "Wrapped BNB", json!(10)),
                raw(Some(other), "cake", "PancakeSwap", json!(5)),
                raw(None, "ghost", "No address", json!(1)),
                raw(Some(&WBNB.to_lowercase()), "wbnb", "Wrapped BNB v2", json!(20)),
            ],
            &bsc(),
        );

        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.rejected[0].1, Rejected::MissingAddress);
        assert_eq!(batch.records[0].name, "Wrapped BNB v2");
        assert_eq!(batch.records[0].liquidity_usd, BigDecimal::from(20));
        assert_eq!(batch.records[1].token_address, other);
    }

    #[test]
    fn normalisation_is_deterministic() {
        let token = raw(Some(WBNB), " wBnB ", " Wrapped BNB ", json!("42"));
        assert_eq!(normalize(&token, &bsc()), normalize(&token, &bsc()));
    }
}
