use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration value {0} is not set")]
    Missing(&'static str),
    #[error("invalid configuration value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{provider} unavailable: {reason}")]
    Unavailable { provider: String, reason: String },
    #[error("{provider} rate limited the loader after {attempts} attempt(s)")]
    RateLimited { provider: String, attempts: u32 },
    #[error("invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable { .. } | SourceError::RateLimited { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }

    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            SourceError::RateLimited { provider, .. } => {
                SourceError::RateLimited { provider, attempts }
            }
            other => other,
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("database task failed: {0}")]
    Task(String),
}
