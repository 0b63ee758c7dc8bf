use crate::app::{App, watch_shutdown};
use crate::config::{Config, SourceKind};
use crate::persistence::{ConflictPolicy, PgPool, PgTokenRepository, TokenRepository};
use crate::report::Reporter;
use crate::scraper::build_source;
use clap::{Parser, Subcommand};
use diesel::PgConnection;
use diesel::r2d2::ConnectionManager;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

mod app;
mod config;
mod data;
mod error;
mod http;
mod normalizer;
mod persistence;
mod report;
mod schema;
mod scraper;
mod sink;

#[derive(Debug, Parser)]
#[command(name = "bsc-token-loader")]
#[command(about = "Loads BSC token listings from a market-data API into Postgres")]
struct Cli {
    /// Optional TOML config file; environment variables override it.
    #[arg(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, normalise and upsert tokens (default).
    Sync {
        #[arg(long, value_enum)]
        source: Option<SourceKind>,
        /// Number of tokens to collect.
        #[arg(long)]
        limit: Option<usize>,
        /// Skip tokens that are already stored instead of refreshing them.
        #[arg(long)]
        insert_only: bool,
        /// Drop and recreate the table before loading.
        #[arg(long)]
        reset: bool,
    },
    /// Print the row count and the top tokens by liquidity.
    Report {
        #[arg(long)]
        top: Option<usize>,
    },
    /// Print the whole table as CSV.
    Export,
    /// Drop and recreate the table.
    Reset,
    /// Check configuration, API keys and database connectivity.
    Doctor,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync {
        source: None,
        limit: None,
        insert_only: false,
        reset: false,
    });

    if let Commands::Doctor = command {
        return doctor(&cli.config).await;
    }

    let mut config = Config::load(&cli.config)?;
    info!("Starting the loader...");

    match command {
        Commands::Sync {
            source,
            limit,
            insert_only,
            reset,
        } => {
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(limit) = limit {
                config.target_count = limit;
            }
            if insert_only {
                config.conflict_policy = ConflictPolicy::InsertOnly;
            }
            sync(config, reset).await
        }
        Commands::Report { top } => {
            let repository = Arc::new(PgTokenRepository::new(build_pool(&config)?));
            let report = Reporter::new(repository)
                .summary(top.unwrap_or(config.report_top))
                .await?;
            print!("{report}");
            Ok(())
        }
        Commands::Export => {
            let repository = Arc::new(PgTokenRepository::new(build_pool(&config)?));
            let rows = Reporter::new(repository)
                .export_csv(std::io::stdout().lock())
                .await?;
            info!("Exported {rows} rows");
            Ok(())
        }
        Commands::Reset => {
            let repository = PgTokenRepository::new(build_pool(&config)?);
            repository.reset_schema().await?;
            println!("tokens table recreated");
            Ok(())
        }
        Commands::Doctor => Ok(()),
    }
}

async fn sync(config: Config, reset: bool) -> anyhow::Result<()> {
    let source = build_source(&config, config.source)?;
    let repository = Arc::new(PgTokenRepository::new(build_pool(&config)?));
    let run_timeout = config.run_timeout();

    let mut app = App::new(config, source, repository);
    app.prepare_schema(reset).await?;

    let cancellation_token = CancellationToken::new();
    let watcher = watch_shutdown(cancellation_token.clone(), run_timeout);

    let summary = app.run(cancellation_token.clone()).await?;
    cancellation_token.cancel();
    watcher.await?;

    print!("{summary}");
    Ok(())
}

fn build_pool(config: &Config) -> anyhow::Result<Arc<PgPool>> {
    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    let connection_pool = r2d2::Pool::builder()
        .max_size(config.pool_size.max(1))
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;
    Ok(Arc::new(connection_pool))
}

fn mask(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    format!("{visible}*** ({} chars)", value.chars().count())
}

async fn doctor(config_path: &Path) -> anyhow::Result<()> {
    let file_state = if config_path.exists() {
        "found"
    } else {
        "not found, using defaults"
    };
    println!("Config file: {} ({file_state})", config_path.display());

    let mut config = if config_path.exists() {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env(|key| std::env::var(key).ok());

    let database_url = config.database_url.trim();
    if database_url.is_empty() {
        println!("DATABASE_URL: MISSING");
    } else {
        println!("DATABASE_URL: {}", mask(database_url));
    }
    println!(
        "COINGECKO_API_KEY: {}",
        config
            .coingecko
            .api_key()
            .map(mask)
            .unwrap_or_else(|| "not set (public tier)".to_string())
    );
    println!(
        "BIRDEYE_API_KEY: {}",
        config
            .birdeye
            .api_key()
            .map(mask)
            .unwrap_or_else(|| "not set".to_string())
    );
    for kind in [SourceKind::Coingecko, SourceKind::Birdeye] {
        match config.source_enabled(kind) {
            Ok(()) => println!("Adapter {kind}: enabled"),
            Err(e) => println!("Adapter {kind}: disabled ({e})"),
        }
    }

    if let Err(e) = config.validate() {
        println!("Database: skipped ({e})");
        return Ok(());
    }

    let result = async {
        let repository = PgTokenRepository::new(build_pool(&config)?);
        anyhow::Ok(repository.count_tokens().await?)
    }
    .await;
    match result {
        Ok(rows) => println!("Database: reachable, {rows} token(s) stored"),
        Err(e) => {
            warn!("Database check failed: {e}");
            println!("Database: unreachable ({e})");
        }
    }

    Ok(())
}
