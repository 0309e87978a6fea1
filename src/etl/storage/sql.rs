//! SQL balance store (SQLite or Postgres through the sqlx `Any` driver).

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, Pool, Row};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use super::{BalanceRecord, BalanceStore, StoreError, REQUEST_TIMEOUT};

/// Embedded SQL schemas
const SQLITE_SCHEMA_SQL: &str = include_str!("../../../sql/balances_schema.sql");
const POSTGRES_SCHEMA_SQL: &str = include_str!("../../../sql/balances_schema_postgres.sql");

const SELECT_COLUMNS: &str = "token_name, address, block_number, log_index, contract_address, \
     block_hash, transaction_hash, transaction_index, balance";

/// Connection settings for [`SqlBalanceStore`].
#[derive(Debug, Clone)]
pub struct SqlStoreConfig {
    /// `postgres://...`, `sqlite:...`, `:memory:` or a plain SQLite file path.
    pub url: String,
    pub max_connections: u32,
    pub max_lifetime: Duration,
    pub request_timeout: Duration,
}

impl SqlStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for SqlStoreConfig {
    fn default() -> Self {
        Self {
            url: "./ledger.db".to_string(),
            max_connections: 10,
            max_lifetime: Duration::from_secs(60 * 60),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbBackend {
    Sqlite,
    Postgres,
}

/// Balance ledger backed by a pooled SQL database.
pub struct SqlBalanceStore {
    pool: Pool<Any>,
    backend: DbBackend,
    request_timeout: Duration,
}

impl SqlBalanceStore {
    /// Connect, apply backend tuning and load the schema.
    pub async fn connect(config: SqlStoreConfig) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let backend = if config.url.starts_with("postgres://")
            || config.url.starts_with("postgresql://")
        {
            DbBackend::Postgres
        } else {
            DbBackend::Sqlite
        };

        let is_memory = config.url == ":memory:" || config.url == "sqlite::memory:";
        let database_url = match backend {
            DbBackend::Postgres => config.url.clone(),
            DbBackend::Sqlite if is_memory => "sqlite::memory:".to_string(),
            DbBackend::Sqlite if config.url.starts_with("sqlite:") => config.url.clone(),
            DbBackend::Sqlite => {
                if let Some(parent) = Path::new(&config.url).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await.map_err(|e| {
                            StoreError::Unavailable(format!(
                                "failed to create directory {}: {e}",
                                parent.display()
                            ))
                        })?;
                    }
                }
                format!("sqlite://{}?mode=rwc", config.url)
            }
        };

        tracing::debug!(
            target: "erc20_ledger::storage",
            "Connecting to database: {}",
            database_url
        );

        // Every in-memory SQLite connection is its own database: keep exactly
        // one and never recycle it.
        let (max_connections, max_lifetime, idle_timeout) = if is_memory {
            (1, None, None)
        } else {
            (
                config.max_connections.max(1),
                Some(config.max_lifetime),
                Some(Duration::from_secs(10 * 60)),
            )
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .max_lifetime(max_lifetime)
            .idle_timeout(idle_timeout)
            .acquire_timeout(config.request_timeout)
            .connect(&database_url)
            .await?;

        let store = Self {
            pool,
            backend,
            request_timeout: config.request_timeout,
        };
        store.init_schema().await?;

        tracing::info!(
            target: "erc20_ledger::storage",
            backend = ?backend,
            max_connections,
            "Balance store initialized"
        );

        Ok(store)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn sql<'a>(&self, sqlite: &'a str, postgres: &'a str) -> &'a str {
        match self.backend {
            DbBackend::Sqlite => sqlite,
            DbBackend::Postgres => postgres,
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.request_timeout))?
            .map_err(StoreError::from)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        if self.backend == DbBackend::Sqlite {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&self.pool)
                .await?;
            sqlx::query("PRAGMA busy_timeout=5000")
                .execute(&self.pool)
                .await?;
        }

        let schema_sql = self.sql(SQLITE_SCHEMA_SQL, POSTGRES_SCHEMA_SQL);
        for statement in schema_sql.split(';') {
            let sql_lines: Vec<&str> = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect();

            if sql_lines.is_empty() {
                continue;
            }

            sqlx::query(&sql_lines.join("\n"))
                .execute(&self.pool)
                .await?;
        }

        tracing::debug!(target: "erc20_ledger::storage", "Schema loaded successfully");
        Ok(())
    }

    fn row_to_record(row: &AnyRow) -> Result<BalanceRecord, sqlx::Error> {
        Ok(BalanceRecord {
            token_name: row.try_get(0)?,
            address: row.try_get(1)?,
            block_number: row.try_get::<i64, _>(2)? as u64,
            log_index: row.try_get::<i64, _>(3)? as u64,
            contract_address: row.try_get(4)?,
            block_hash: row.try_get(5)?,
            transaction_hash: row.try_get(6)?,
            transaction_index: row.try_get::<i64, _>(7)? as u64,
            balance: row.try_get(8)?,
        })
    }
}

#[async_trait]
impl BalanceStore for SqlBalanceStore {
    async fn latest_balance(
        &self,
        token: &str,
        address: &str,
    ) -> Result<Option<BalanceRecord>, StoreError> {
        let sql = match self.backend {
            DbBackend::Sqlite => format!(
                "SELECT {SELECT_COLUMNS} FROM db_balances WHERE token_name = ? AND address = ? \
                 ORDER BY block_number DESC, log_index DESC LIMIT 1"
            ),
            DbBackend::Postgres => format!(
                "SELECT {SELECT_COLUMNS} FROM db_balances WHERE token_name = $1 AND address = $2 \
                 ORDER BY block_number DESC, log_index DESC LIMIT 1"
            ),
        };

        let row = self
            .timed(
                sqlx::query(&sql)
                    .bind(token)
                    .bind(address)
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.as_ref()
            .map(Self::row_to_record)
            .transpose()
            .map_err(StoreError::from)
    }

    async fn max_block(&self, token: &str) -> Result<Option<u64>, StoreError> {
        let sql = self.sql(
            "SELECT MAX(block_number) FROM db_balances WHERE token_name = ?",
            "SELECT MAX(block_number) FROM db_balances WHERE token_name = $1",
        );

        let max: Option<i64> = self
            .timed(sqlx::query_scalar(sql).bind(token).fetch_one(&self.pool))
            .await?;

        Ok(max.map(|block| block as u64))
    }

    async fn delete_block(&self, token: &str, block: u64) -> Result<u64, StoreError> {
        let sql = self.sql(
            "DELETE FROM db_balances WHERE token_name = ? AND block_number = ?",
            "DELETE FROM db_balances WHERE token_name = $1 AND block_number = $2",
        );

        let result = self
            .timed(
                sqlx::query(sql)
                    .bind(token)
                    .bind(block as i64)
                    .execute(&self.pool),
            )
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert(&self, record: &BalanceRecord) -> Result<(), StoreError> {
        let sql = self.sql(
            "INSERT INTO db_balances (token_name, address, block_number, log_index, \
             contract_address, block_hash, transaction_hash, transaction_index, balance) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            "INSERT INTO db_balances (token_name, address, block_number, log_index, \
             contract_address, block_hash, transaction_hash, transaction_index, balance) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        );

        self.timed(
            sqlx::query(sql)
                .bind(record.token_name.as_str())
                .bind(record.address.as_str())
                .bind(record.block_number as i64)
                .bind(record.log_index as i64)
                .bind(record.contract_address.as_str())
                .bind(record.block_hash.as_str())
                .bind(record.transaction_hash.as_str())
                .bind(record.transaction_index as i64)
                .bind(record.balance.as_str())
                .execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}
