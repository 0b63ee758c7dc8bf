use crate::data::TokenRecord;
use crate::normalizer::dedupe_by_address;
use crate::persistence::{ConflictPolicy, TokenRepository};
use log::{debug, error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failed_chunks: usize,
    pub not_attempted: usize,
}

impl SinkSummary {
    pub fn saved(&self) -> usize {
        self.inserted + self.updated
    }
}

pub struct UpsertSink<R: TokenRepository + ?Sized> {
    repository: Arc<R>,
    batch_size: usize,
    policy: ConflictPolicy,
}

impl<R: TokenRepository + ?Sized> UpsertSink<R> {
    pub fn new(repository: Arc<R>, batch_size: usize, policy: ConflictPolicy) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// A failed chunk is counted and skipped; cancellation stops before the next chunk.
    pub async fn save(
        &self,
        records: Vec<TokenRecord>,
        cancel: &CancellationToken,
    ) -> SinkSummary {
        let (records, collapsed) = dedupe_by_address(records);
        if collapsed > 0 {
            debug!("Collapsed {collapsed} duplicate address(es) before saving");
        }

        let mut summary = SinkSummary::default();
        let chunk_count = records.len().div_ceil(self.batch_size);

        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                let remaining = records.len() - index * self.batch_size;
                info!("Cancellation requested, {remaining} record(s) left unsaved");
                summary.not_attempted = remaining;
                break;
            }

            match self.repository.upsert_chunk(chunk, self.policy).await {
                Ok(outcome) => {
                    summary.inserted += outcome.inserted;
                    summary.updated += outcome.updated;
                    summary.skipped += outcome.skipped;
                    info!(
                        "Saved chunk {}/{chunk_count}: {} inserted, {} updated, {} skipped",
                        index + 1,
                        outcome.inserted,
                        outcome.updated,
                        outcome.skipped
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to save chunk {}/{chunk_count} ({} records): {e}",
                        index + 1,
                        chunk.len()
                    );
                    summary.failed += chunk.len();
                    summary.failed_chunks += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::testing::MemoryRepository;
    use bigdecimal::BigDecimal;

    fn record(n: u8, liquidity: i64) -> TokenRecord {
        TokenRecord {
            network: "BSC".to_string(),
            name: format!("Token {n}"),
            symbol: format!("T{n}"),
            liquidity_usd: BigDecimal::from(liquidity),
            token_address: format!("0x{:040x}", n),
        }
    }

    fn records(count: u8) -> Vec<TokenRecord> {
        (1..=count).map(|n| record(n, i64::from(n))).collect()
    }

    #[tokio::test]
    async fn records_are_chunked_by_batch_size() {
        let repo = Arc::new(MemoryRepository::default());
        let sink = UpsertSink::new(repo.clone(), DEFAULT_BATCH_SIZE, ConflictPolicy::Update);

        let summary = sink.save(records(120), &CancellationToken::new()).await;

        assert_eq!(summary.inserted, 120);
        assert_eq!(summary.saved(), 120);
        assert_eq!(*repo.chunk_sizes.lock().await, vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_abort_the_rest() {
        let repo = Arc::new(MemoryRepository::default());
        repo.poison(&record(3, 0).token_address).await;
        let sink = UpsertSink::new(repo.clone(), 2, ConflictPolicy::Update);

        let summary = sink.save(records(6), &CancellationToken::new()).await;

        assert_eq!(summary.inserted, 4);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(repo.count_tokens().await.unwrap(), 4);
        assert!(repo.get(&record(1, 0).token_address).await.is_some());
        assert!(repo.get(&record(4, 0).token_address).await.is_none());
        assert!(repo.get(&record(5, 0).token_address).await.is_some());
    }

    #[tokio::test]
    async fn same_address_in_one_batch_keeps_last_write() {
        let repo = Arc::new(MemoryRepository::default());
        let sink = UpsertSink::new(repo.clone(), 10, ConflictPolicy::Update);

        let summary = sink
            .save(vec![record(1, 10), record(2, 5), record(1, 99)], &CancellationToken::new())
            .await;

        assert_eq!(summary.inserted, 2);
        assert_eq!(repo.count_tokens().await.unwrap(), 2);
        let stored = repo.get(&record(1, 0).token_address).await.unwrap();
        assert_eq!(stored.liquidity_usd, BigDecimal::from(99));
    }

    #[tokio::test]
    async fn insert_only_leaves_existing_rows_alone() {
        let repo = Arc::new(MemoryRepository::default());
        UpsertSink::new(repo.clone(), 10, ConflictPolicy::Update)
            .save(vec![record(1, 10)], &CancellationToken::new())
            .await;

        let summary = UpsertSink::new(repo.clone(), 10, ConflictPolicy::InsertOnly)
            .save(vec![record(1, 500), record(2, 1)], &CancellationToken::new())
            .await;

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
        let stored = repo.get(&record(1, 0).token_address).await.unwrap();
        assert_eq!(stored.liquidity_usd, BigDecimal::from(10));
    }

    #[tokio::test]
    async fn cancelled_sink_reports_unsaved_records() {
        let repo = Arc::new(MemoryRepository::default());
        let sink = UpsertSink::new(repo.clone(), 10, ConflictPolicy::Update);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = sink.save(records(25), &cancel).await;

        assert_eq!(summary.saved(), 0);
        assert_eq!(summary.not_attempted, 25);
        assert_eq!(repo.count_tokens().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let repo = Arc::new(MemoryRepository::default());
        let sink = UpsertSink::new(repo.clone(), 10, ConflictPolicy::Update);

        let summary = sink.save(vec![], &CancellationToken::new()).await;

        assert_eq!(summary, SinkSummary::default());
        assert!(repo.chunk_sizes.lock().await.is_empty());
    }
}
