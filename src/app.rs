use crate::config::Config;
use crate::data::ChainSpec;
use crate::normalizer::normalize_batch;
use crate::persistence::TokenRepository;
use crate::report::{Report, Reporter};
use crate::scraper::{TokenSource, collect_tokens};
use crate::sink::{SinkSummary, UpsertSink};
use log::{error, info, warn};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Fetching,
    Normalizing,
    Saving,
    Reporting,
    Done,
}

impl Display for PipelineStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Fetching => "fetching",
            PipelineStage::Normalizing => "normalizing",
            PipelineStage::Saving => "saving",
            PipelineStage::Reporting => "reporting",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub source: String,
    pub fetched: usize,
    pub unresolved: usize,
    pub source_errors: usize,
    pub rate_limited: bool,
    pub rejected: usize,
    pub duplicates: usize,
    pub sink: SinkSummary,
    pub cancelled: bool,
    pub report: Option<Report>,
}

impl RunSummary {
    pub fn saved(&self) -> usize {
        self.sink.saved()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Source: {}", self.source)?;
        writeln!(
            f,
            "Fetched: {} (unresolved: {}, source errors: {}{})",
            self.fetched,
            self.unresolved,
            self.source_errors,
            if self.rate_limited { ", rate limited" } else { "" }
        )?;
        writeln!(
            f,
            "Rejected: {}, duplicates collapsed: {}",
            self.rejected, self.duplicates
        )?;
        writeln!(
            f,
            "Saved: {} (inserted: {}, updated: {}, skipped: {})",
            self.saved(),
            self.sink.inserted,
            self.sink.updated,
            self.sink.skipped
        )?;
        writeln!(
            f,
            "Failed: {} in {} chunk(s), not attempted: {}",
            self.sink.failed, self.sink.failed_chunks, self.sink.not_attempted
        )?;
        if self.cancelled {
            writeln!(f, "Run was interrupted before completion")?;
        }
        if let Some(report) = &self.report {
            write!(f, "{report}")?;
        }
        Ok(())
    }
}

pub struct App<S: TokenSource, P: TokenRepository> {
    config: Config,
    source: S,
    repository: Arc<P>,
    stage: PipelineStage,
}

impl<S: TokenSource, P: TokenRepository + 'static> App<S, P> {
    pub fn new(config: Config, source: S, repository: Arc<P>) -> Self {
        Self {
            config,
            source,
            repository,
            stage: PipelineStage::Idle,
        }
    }

    #[cfg(test)]
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Creates the table if needed; `reset` drops and recreates it first.
    pub async fn prepare_schema(&self, reset: bool) -> anyhow::Result<()> {
        if reset {
            self.repository.reset_schema().await?;
        } else {
            self.repository.ensure_schema().await?;
        }
        Ok(())
    }

    pub async fn run(&mut self, cancellation_token: CancellationToken) -> anyhow::Result<RunSummary> {
        let chain = ChainSpec::evm(self.config.network.clone());
        let mut summary = RunSummary {
            source: self.source.name().to_string(),
            ..RunSummary::default()
        };

        self.advance(PipelineStage::Fetching);
        let fetched = collect_tokens(
            &self.source,
            self.config.target_count,
            self.config.max_pages,
            cancellation_token.clone(),
        )
        .await;
        summary.fetched = fetched.tokens.len();
        summary.unresolved = fetched.stats.unresolved;
        summary.source_errors = fetched.stats.source_errors;
        summary.rate_limited = fetched.stats.rate_limited;
        info!(
            "Fetched {} tokens from {} ({} pages)",
            summary.fetched, summary.source, fetched.stats.pages
        );

        self.advance(PipelineStage::Normalizing);
        let batch = normalize_batch(fetched.tokens, &chain);
        for (raw, reason) in &batch.rejected {
            warn!(
                "Rejected {} ({}): {reason}",
                raw.symbol.as_deref().unwrap_or("?"),
                raw.name.as_deref().unwrap_or("?")
            );
        }
        summary.rejected = batch.rejected.len();
        summary.duplicates = batch.duplicates;

        self.advance(PipelineStage::Saving);
        let sink = UpsertSink::new(
            self.repository.clone(),
            self.config.batch_size,
            self.config.conflict_policy,
        );
        summary.sink = sink.save(batch.records, &cancellation_token).await;

        self.advance(PipelineStage::Reporting);
        summary.report = match Reporter::new(self.repository.clone())
            .summary(self.config.report_top)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Failed to build report: {e}");
                None
            }
        };

        summary.cancelled = fetched.stats.cancelled || cancellation_token.is_cancelled();
        self.advance(PipelineStage::Done);

        Ok(summary)
    }

    fn advance(&mut self, next: PipelineStage) {
        info!("Pipeline stage: {} -> {next}", self.stage);
        self.stage = next;
    }
}

pub fn watch_shutdown(cancellation_token: CancellationToken, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancellation_token.cancelled() => return,
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Interrupt received, finishing current step..."),
                Err(e) => {
                    error!("Failed to listen for interrupt: {e}");
                    return;
                }
            },
            _ = tokio::time::sleep(deadline) => {
                warn!("Run deadline of {deadline:?} reached, finishing current step...");
            }
        }
        cancellation_token.cancel();
    })
}
