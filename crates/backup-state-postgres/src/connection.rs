use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backup_core::resilience::AdapterLivenessCheck;
use backup_core::{CircuitBreaker, CircuitBreakerConfig, CoreError, CoreResult};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::migrations::generate_migrations;
use crate::PostgresConfig;

/// SQLSTATE codes that mean the server dropped or refused the session
const CONNECT_SQLSTATES: [&str; 3] = ["57P01", "57P02", "57P03"];

/// Check whether a driver error means the database could not be reached
pub fn is_connect_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || CONNECT_SQLSTATES.contains(&&*code))
            .unwrap_or(false),
        _ => false,
    }
}

/// Liveness probe for the database breaker
struct PgLiveness {
    pool: PgPool,
}

#[async_trait]
impl AdapterLivenessCheck for PgLiveness {
    async fn is_alive(&self) -> CoreResult<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("PostgreSQL liveness check failed: {}", e);
                Ok(false)
            }
        }
    }
}

/// Database connection manager for Postgres, guarded by its own circuit breaker
#[derive(Clone)]
pub struct PostgresConnection {
    pool: PgPool,
    breaker: Arc<CircuitBreaker>,
}

impl PostgresConnection {
    /// Create the pool without connecting.
    ///
    /// Connections are opened on first use so the service can start while
    /// the database is down; the breaker takes over from there.
    pub fn new(
        config: &PostgresConfig,
        breaker_config: CircuitBreakerConfig,
        shutdown: &CancellationToken,
    ) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_lazy(&config.connection_string)
            .map_err(|e| CoreError::ConfigurationError(format!("Invalid database URL: {}", e)))?;

        Ok(Self::from_pool(pool, breaker_config, shutdown))
    }

    /// Wrap an existing pool
    pub fn from_pool(
        pool: PgPool,
        breaker_config: CircuitBreakerConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let liveness = Arc::new(PgLiveness { pool: pool.clone() });
        let breaker = CircuitBreaker::with_cancellation(breaker_config, liveness, shutdown);
        Self { pool, breaker }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The breaker guarding this connection
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Apply every migration that has not been recorded yet
    pub async fn run_migrations(&self) -> CoreResult<()> {
        info!("Running database migrations");

        self.guarded(
            "create migrations table",
            sqlx::raw_sql(
                "CREATE TABLE IF NOT EXISTS backup_schema_migrations (
                    version TEXT PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool),
        )
        .await?;

        for (version, sql) in generate_migrations() {
            let applied: Option<(String,)> = self
                .guarded(
                    "read migration",
                    sqlx::query_as("SELECT version FROM backup_schema_migrations WHERE version = $1")
                        .bind(version)
                        .fetch_optional(&self.pool),
                )
                .await?;
            if applied.is_some() {
                continue;
            }

            debug!("Applying migration: {}", version);
            self.guarded("apply migration", sqlx::raw_sql(sql).execute(&self.pool))
                .await?;
            self.guarded(
                "record migration",
                sqlx::query("INSERT INTO backup_schema_migrations (version) VALUES ($1) ON CONFLICT DO NOTHING")
                    .bind(version)
                    .execute(&self.pool),
            )
            .await?;
        }

        info!("Migrations completed successfully");
        Ok(())
    }

    /// Run one database operation behind the breaker.
    ///
    /// Fails fast with a connect error while the circuit is open, otherwise
    /// awaits the query, classifies its error and reports the outcome.
    pub(crate) async fn guarded<T, Fut>(&self, operation: &str, query: Fut) -> CoreResult<T>
    where
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        if !self.breaker.is_connected() {
            return Err(CoreError::database_connect(
                format!("circuit open, {} not attempted", operation),
                self.breaker.connect_failure_info(),
            ));
        }

        let result = query.await.map_err(|e| self.map_error(operation, e));
        self.breaker.record_outcome(&result);
        result
    }

    fn map_error(&self, operation: &str, err: sqlx::Error) -> CoreError {
        if is_connect_error(&err) {
            warn!(service = %self.breaker.service_name(), "Failed to {}: {}", operation, err);
            CoreError::database_connect(
                format!("Failed to {}: {}", operation, err),
                self.breaker.connect_failure_info(),
            )
        } else {
            CoreError::database(format!("Failed to {}: {}", operation, err))
        }
    }
}
