use crate::error::PersistenceError;
use crate::persistence::{TokenModel, TokenRepository};
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::sync::Arc;

pub const CSV_HEADER: [&str; 8] = [
    "id",
    "network",
    "name",
    "symbol",
    "liquidity_usd",
    "token_address",
    "created_at",
    "updated_at",
];

#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    pub total: i64,
    pub top: Vec<TokenModel>,
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tokens stored: {}", self.total)?;
        if self.top.is_empty() {
            return Ok(());
        }

        writeln!(f, "Top {} by liquidity:", self.top.len())?;
        writeln!(
            f,
            "{:>3}  {:<12} {:<30} {:>22}  {}",
            "#", "SYMBOL", "NAME", "LIQUIDITY_USD", "ADDRESS"
        )?;
        for (rank, token) in self.top.iter().enumerate() {
            writeln!(
                f,
                "{:>3}  {:<12} {:<30} {:>22}  {}",
                rank + 1,
                clip(&token.symbol, 12),
                clip(&token.name, 30),
                token.liquidity_usd.with_scale(2).to_string(),
                token.token_address
            )?;
        }
        Ok(())
    }
}

fn clip(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut clipped: String = value.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}

pub struct Reporter<R: TokenRepository + ?Sized> {
    repository: Arc<R>,
}

impl<R: TokenRepository + ?Sized> Reporter<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn summary(&self, top_k: usize) -> Result<Report, PersistenceError> {
        let total = self.repository.count_tokens().await?;
        let top = self.repository.top_by_liquidity(top_k).await?;
        Ok(Report { total, top })
    }

    pub async fn export_csv<W: Write>(&self, writer: W) -> anyhow::Result<usize> {
        let tokens = self.repository.all_tokens().await?;
        write_csv(&tokens, writer)?;
        Ok(tokens.len())
    }
}

pub fn write_csv<W: Write>(tokens: &[TokenModel], writer: W) -> csv::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;
    for token in tokens {
        csv_writer.write_record([
            token.id.to_string(),
            token.network.clone(),
            token.name.clone(),
            token.symbol.clone(),
            token.liquidity_usd.to_string(),
            token.token_address.clone(),
            token.created_at.to_rfc3339(),
            token.updated_at.to_rfc3339(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}
