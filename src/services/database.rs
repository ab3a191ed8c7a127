//! src/services/database.rs
//!
//! Connection and transaction management for the SQLite store.
//!
//! SQLite only ever allows one writer, so the store keeps two pools: a write
//! pool holding exactly one connection, whose transactions open with
//! `BEGIN IMMEDIATE` so the write lock is taken before the first read, and a
//! read-only pool sized to the available parallelism. Every mutation must go
//! through [`Database::write_tx`]; reads go through [`Database::read_tx`].
//!
//! Both helpers run under the configured operation deadline. Dropping the
//! returned future at any point (deadline, caller cancellation) drops the
//! open transaction, which SQLx rolls back before the connection is reused.

use super::error::{ServiceError, ServiceResult};
use futures::future::BoxFuture;
use sqlx::{
    Sqlite, SqliteConnection, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{future::Future, num::NonZeroUsize, path::Path, str::FromStr, time::Duration};
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_READ_CONNECTIONS: usize = 4;
const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle over the single-writer / multi-reader pool pair.
///
/// Cheap to clone: both pools are reference counted internally.
#[derive(Clone, Debug)]
pub struct Database {
    write: SqlitePool,
    read: SqlitePool,
    operation_timeout: Duration,
}

impl Database {
    /// Connect using a `sqlite://<path>` URL. The database must live in a file:
    /// both pools need to see the same data.
    pub async fn connect(url: &str, operation_timeout: Duration) -> ServiceResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?;
        Self::connect_with(options, operation_timeout).await
    }

    /// Connect to a database file by path.
    pub async fn open(path: impl AsRef<Path>, operation_timeout: Duration) -> ServiceResult<Self> {
        let options = SqliteConnectOptions::new().filename(path.as_ref());
        Self::connect_with(options, operation_timeout).await
    }

    pub async fn connect_with(
        options: SqliteConnectOptions,
        operation_timeout: Duration,
    ) -> ServiceResult<Self> {
        let base = options
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true)
            .pragma("temp_store", "MEMORY");

        // The writer goes first: it creates the file and switches it to WAL,
        // which the read-only connections rely on.
        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(
                base.clone()
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal),
            )
            .await?;

        let read_connections = read_pool_size();
        let read = SqlitePoolOptions::new()
            .max_connections(read_connections)
            .connect_with(base.read_only(true))
            .await?;

        debug!(read_connections, "sqlite pools ready");

        Ok(Self {
            write,
            read,
            operation_timeout,
        })
    }

    /// The single write-capable pool. Prefer [`Database::write_tx`].
    pub fn writer(&self) -> &SqlitePool {
        &self.write
    }

    /// The read-only pool. Prefer [`Database::read_tx`].
    pub fn reader(&self) -> &SqlitePool {
        &self.read
    }

    /// Run `f` inside an immediate-lock write transaction.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. Storage errors
    /// raised by `f` come back as [`ServiceError::TransactionFailure`] carrying
    /// the rollback outcome; domain errors are returned as-is once rolled back.
    pub async fn write_tx<T, F>(&self, operation: &'static str, f: F) -> ServiceResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, ServiceResult<T>> + Send,
    {
        let scoped = async {
            let tx = self
                .write
                .begin_with("BEGIN IMMEDIATE")
                .await
                .map_err(ServiceError::from_sqlx)?;
            run_scoped(operation, tx, f).await
        };
        self.with_deadline(operation, scoped).await
    }

    /// Run `f` inside a deferred transaction on a read-only connection so
    /// multi-statement reads see one consistent snapshot.
    pub async fn read_tx<T, F>(&self, operation: &'static str, f: F) -> ServiceResult<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, ServiceResult<T>> + Send,
    {
        let scoped = async {
            let tx = self.read.begin().await.map_err(ServiceError::from_sqlx)?;
            run_scoped(operation, tx, f).await
        };
        self.with_deadline(operation, scoped).await
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        scoped: impl Future<Output = ServiceResult<T>>,
    ) -> ServiceResult<T> {
        match tokio::time::timeout(self.operation_timeout, scoped).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "deadline exceeded, transaction rolled back"
                );
                Err(ServiceError::DeadlineExceeded(operation))
            }
        }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn run_migrations(&self) -> ServiceResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.write).await?;
        }

        Ok(())
    }

    /// Lightweight connectivity check against both pools.
    pub async fn ping(&self) -> ServiceResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.write)
            .await?;
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.read)
            .await?;
        Ok(())
    }

    /// On-disk size of the database: `page_count * page_size`.
    pub async fn database_size_bytes(&self) -> ServiceResult<i64> {
        let size = sqlx::query_scalar::<_, i64>(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.read)
        .await?;
        Ok(size)
    }

    pub async fn close(&self) {
        self.read.close().await;
        self.write.close().await;
    }
}

async fn run_scoped<T, F>(
    operation: &'static str,
    mut tx: Transaction<'static, Sqlite>,
    f: F,
) -> ServiceResult<T>
where
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, ServiceResult<T>>,
{
    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(|err| match ServiceError::from_sqlx(err) {
                busy @ ServiceError::Busy(_) => busy,
                other => ServiceError::TransactionFailure {
                    operation,
                    cause: Box::new(other),
                    rollback: None,
                },
            })?;
            Ok(value)
        }
        Err(cause) => {
            let rollback = tx.rollback().await.err();
            if let Some(err) = &rollback {
                warn!(operation, error = %err, cause = %cause, "rollback failed");
            }
            Err(match (cause, rollback) {
                (cause, Some(rollback)) => ServiceError::TransactionFailure {
                    operation,
                    cause: Box::new(cause),
                    rollback: Some(rollback),
                },
                (ServiceError::Sqlx(err), None) => match ServiceError::from_sqlx(err) {
                    busy @ ServiceError::Busy(_) => busy,
                    other => ServiceError::TransactionFailure {
                        operation,
                        cause: Box::new(other),
                        rollback: None,
                    },
                },
                (cause, None) => cause,
            })
        }
    }
}

fn read_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(MIN_READ_CONNECTIONS)
        .max(MIN_READ_CONNECTIONS) as u32
}
