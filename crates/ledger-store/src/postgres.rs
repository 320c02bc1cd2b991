use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::{
    ItemId, LedgerStoreError, Result, RetryPolicy, StockRecord, Version,
    store::{LedgerStore, Transform},
};

/// Connection parameters for the PostgreSQL ledger.
#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Maximum number of pooled connections (default: 10).
    pub max_connections: u32,
    /// Bound on pool acquisition, row-lock waits and statement execution.
    pub timeout: Duration,
}

impl PostgresConfig {
    /// Builds sqlx connection options from this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// PostgreSQL-backed ledger store implementation.
///
/// Each mutation runs in its own transaction holding the item's row lock
/// (`SELECT ... FOR UPDATE`), so writers on the same item serialize inside
/// the database while writers on other items proceed.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    retry: RetryPolicy,
    timeout: Duration,
}

impl PostgresLedgerStore {
    /// Creates a new store over an existing pool with default retry policy.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Connects a pool using the given configuration.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.timeout)
            .connect_with(config.connect_options())
            .await?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connected to ledger database"
        );

        Ok(Self::new(pool).with_timeout(config.timeout))
    }

    /// Replaces the retry policy applied to every operation.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the lock and statement timeout used inside mutation transactions.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the ledger table if it does not exist yet.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn try_read(&self, item_id: &ItemId) -> Result<Option<StockRecord>> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT quantity, version FROM inventory WHERE item_id = $1")
                .bind(item_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let Some((quantity, version)) = row else {
            return Ok(None);
        };
        Ok(Some(StockRecord {
            item_id: item_id.clone(),
            quantity,
            version: stored_version(version)?,
        }))
    }

    /// Opens a transaction with lock and statement timeouts applied.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;

        let timeout = format!("{}ms", self.timeout.as_millis());
        sqlx::query(
            "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)",
        )
        .bind(&timeout)
        .execute(&mut *tx)
        .await?;

        Ok(tx)
    }

    async fn lock_row(
        tx: &mut Transaction<'static, Postgres>,
        item_id: &ItemId,
    ) -> Result<Option<(i64, Version)>> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT quantity, version FROM inventory WHERE item_id = $1 FOR UPDATE",
        )
        .bind(item_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some((quantity, version)) => Ok(Some((quantity, stored_version(version)?))),
            None => Ok(None),
        }
    }

    async fn try_apply(&self, item_id: &ItemId, transform: Transform<'_>) -> Result<StockRecord> {
        let mut tx = self.begin().await?;
        let current = Self::lock_row(&mut tx, item_id).await?;

        let quantity = transform(current.map(|(quantity, _)| quantity))
            .ok_or_else(|| LedgerStoreError::Rejected(item_id.clone()))?;

        let version: i64 = if current.is_some() {
            sqlx::query_scalar(
                r#"
                UPDATE inventory
                SET quantity = $2, version = version + 1, updated_at = now()
                WHERE item_id = $1
                RETURNING version
                "#,
            )
            .bind(item_id.as_str())
            .bind(quantity)
            .fetch_one(&mut *tx)
            .await?
        } else {
            // The row lock above cannot cover a row that does not exist yet;
            // a concurrent creator wins and we start over.
            sqlx::query_scalar(
                r#"
                INSERT INTO inventory (item_id, quantity, version)
                VALUES ($1, $2, 1)
                ON CONFLICT (item_id) DO NOTHING
                RETURNING version
                "#,
            )
            .bind(item_id.as_str())
            .bind(quantity)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerStoreError::InsertRace(item_id.clone()))?
        };

        let written = StockRecord {
            item_id: item_id.clone(),
            quantity,
            version: stored_version(version)?,
        };

        match tx.commit().await {
            Ok(()) => Ok(written),
            Err(err) => {
                let previous = current.map(|(_, version)| version);
                self.settle_commit(written, previous, err).await
            }
        }
    }

    /// Decides the outcome of a `COMMIT` whose reply was lost.
    ///
    /// The server may have committed before the connection broke, so the
    /// attempt is not simply repeated. The row is re-read under `FOR UPDATE`,
    /// which waits for a commit still in flight: the written version means
    /// the mutation landed, the version seen before the write means it did
    /// not. Anything else is [`LedgerStoreError::CommitUnknown`].
    async fn settle_commit(
        &self,
        written: StockRecord,
        previous: Option<Version>,
        err: sqlx::Error,
    ) -> Result<StockRecord> {
        tracing::warn!(
            item_id = %written.item_id,
            error = %err,
            "commit reply lost, checking stored row"
        );

        let stored = match self.begin().await {
            Ok(mut tx) => {
                let row = Self::lock_row(&mut tx, &written.item_id).await;
                let _ = tx.rollback().await;
                row
            }
            Err(check) => Err(check),
        };

        match stored {
            Ok(Some(row)) if row == (written.quantity, written.version) => {
                tracing::info!(
                    item_id = %written.item_id,
                    version = %written.version,
                    "lost commit had landed"
                );
                Ok(written)
            }
            Ok(row) if row.map(|(_, version)| version) == previous => {
                Err(LedgerStoreError::Database(err))
            }
            Ok(row) => Err(LedgerStoreError::CommitUnknown {
                item_id: written.item_id,
                reason: format!(
                    "{err}; stored version {:?} matches neither {:?} nor {}",
                    row.map(|(_, version)| version),
                    previous,
                    written.version
                ),
            }),
            Err(check) => Err(LedgerStoreError::CommitUnknown {
                item_id: written.item_id,
                reason: format!("{err}; check failed: {check}"),
            }),
        }
    }
}

fn stored_version(raw: i64) -> Result<Version> {
    Version::try_from(raw)
        .map_err(|err| LedgerStoreError::Database(sqlx::Error::Decode(Box::new(err))))
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn read(&self, item_id: &ItemId) -> Result<Option<StockRecord>> {
        self.retry.run(move || self.try_read(item_id)).await
    }

    #[tracing::instrument(skip(self, transform), fields(item_id = %item_id))]
    async fn apply_atomic(
        &self,
        item_id: &ItemId,
        transform: Transform<'_>,
    ) -> Result<StockRecord> {
        self.retry
            .run(move || self.try_apply(item_id, transform))
            .await
    }
}
