use crate::data::TokenRecord;
use crate::error::PersistenceError;
use crate::schema::tokens;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::r2d2::ConnectionManager;
use diesel::upsert::excluded;
use diesel::{
    Connection, ExpressionMethods, Insertable, PgConnection, QueryDsl, Queryable, RunQueryDsl,
    Selectable, SelectableHelper,
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{info, warn};
use r2d2::Pool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Update,
    InsertOnly,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[derive(Debug, Clone, PartialEq)]
pub struct TokenModel {
    pub id: i64,
    pub network: String,
    pub name: String,
    pub symbol: String,
    pub liquidity_usd: BigDecimal,
    pub token_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::tokens)]
pub struct NewToken {
    pub network: String,
    pub name: String,
    pub symbol: String,
    pub liquidity_usd: BigDecimal,
    pub token_address: String,
}

impl From<&TokenRecord> for NewToken {
    fn from(record: &TokenRecord) -> Self {
        Self {
            network: record.network.clone(),
            name: record.name.clone(),
            symbol: record.symbol.clone(),
            liquidity_usd: record.liquidity_usd.clone(),
            token_address: record.token_address.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn ensure_schema(&self) -> Result<(), PersistenceError>;
    /// Drops and recreates the table. Destroys every stored token.
    async fn reset_schema(&self) -> Result<(), PersistenceError>;
    /// Writes one chunk atomically. Addresses must be unique within the chunk.
    async fn upsert_chunk(
        &self,
        chunk: &[TokenRecord],
        policy: ConflictPolicy,
    ) -> Result<ChunkOutcome, PersistenceError>;
    async fn count_tokens(&self) -> Result<i64, PersistenceError>;
    async fn top_by_liquidity(&self, limit: usize) -> Result<Vec<TokenModel>, PersistenceError>;
    async fn all_tokens(&self) -> Result<Vec<TokenModel>, PersistenceError>;
}

pub struct PgTokenRepository {
    pg_pool: Arc<PgPool>,
}

impl PgTokenRepository {
    pub fn new(pg_pool: Arc<PgPool>) -> Self {
        Self { pg_pool }
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let pg_pool = self.pg_pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pg_pool.get()?;
            f(&mut connection)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

fn run_migrations(connection: &mut PgConnection) -> Result<usize, PersistenceError> {
    let applied = connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| PersistenceError::Migration(e.to_string()))?;
    Ok(applied.len())
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let applied = self.with_connection(run_migrations).await?;
        info!("Schema ready ({applied} migration(s) applied)");
        Ok(())
    }

    async fn reset_schema(&self) -> Result<(), PersistenceError> {
        warn!("Resetting schema: every stored token will be dropped");
        self.with_connection(|connection| {
            connection
                .revert_all_migrations(MIGRATIONS)
                .map_err(|e| PersistenceError::Migration(e.to_string()))?;
            run_migrations(connection)
        })
        .await?;
        info!("Schema recreated");
        Ok(())
    }

    async fn upsert_chunk(
        &self,
        chunk: &[TokenRecord],
        policy: ConflictPolicy,
    ) -> Result<ChunkOutcome, PersistenceError> {
        let rows: Vec<NewToken> = chunk.iter().map(NewToken::from).collect();

        self.with_connection(move |connection| {
            connection.transaction::<_, PersistenceError, _>(|connection| {
                let addresses: Vec<&str> = rows.iter().map(|row| row.token_address.as_str()).collect();
                let existing = tokens::table
                    .filter(tokens::token_address.eq_any(addresses))
                    .count()
                    .get_result::<i64>(connection)? as usize;

                let outcome = match policy {
                    ConflictPolicy::Update => {
                        diesel::insert_into(tokens::table)
                            .values(&rows)
                            .on_conflict(tokens::token_address)
                            .do_update()
                            .set((
                                tokens::network.eq(excluded(tokens::network)),
                                tokens::name.eq(excluded(tokens::name)),
                                tokens::symbol.eq(excluded(tokens::symbol)),
                                tokens::liquidity_usd.eq(excluded(tokens::liquidity_usd)),
                                tokens::updated_at.eq(excluded(tokens::updated_at)),
                            ))
                            .execute(connection)?;
                        ChunkOutcome {
                            inserted: rows.len().saturating_sub(existing),
                            updated: existing,
                            skipped: 0,
                        }
                    }
                    ConflictPolicy::InsertOnly => {
                        let inserted = diesel::insert_into(tokens::table)
                            .values(&rows)
                            .on_conflict(tokens::token_address)
                            .do_nothing()
                            .execute(connection)?;
                        ChunkOutcome {
                            inserted,
                            updated: 0,
                            skipped: rows.len().saturating_sub(inserted),
                        }
                    }
                };

                Ok(outcome)
            })
        })
        .await
    }

    async fn count_tokens(&self) -> Result<i64, PersistenceError> {
        self.with_connection(|connection| {
            Ok(tokens::table.count().get_result::<i64>(connection)?)
        })
        .await
    }

    async fn top_by_liquidity(&self, limit: usize) -> Result<Vec<TokenModel>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |connection| {
            Ok(tokens::table
                .order((tokens::liquidity_usd.desc(), tokens::token_address.asc()))
                .limit(limit)
                .select(TokenModel::as_select())
                .load::<TokenModel>(connection)?)
        })
        .await
    }

    async fn all_tokens(&self) -> Result<Vec<TokenModel>, PersistenceError> {
        self.with_connection(|connection| {
            Ok(tokens::table
                .order((tokens::liquidity_usd.desc(), tokens::token_address.asc()))
                .select(TokenModel::as_select())
                .load::<TokenModel>(connection)?)
        })
        .await
    }
}
