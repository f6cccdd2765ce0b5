
use crate::db::DbError;
use backon::{ExponentialBuilder, Retryable};
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        Self::Int(value as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Pool timeouts, I/O and SQLite busy/locked results.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            // SQLITE_BUSY, SQLITE_LOCKED
            matches!(primary, Some(5) | Some(6)) || db.message().contains("timeout")
        }
        _ => false,
    }
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn retrying<T, F, Fut>(&self, label: &str, operation: F) -> Result<T, DbError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let attempts = self.retry.max_attempts;
        operation
            .retry(self.retry.backoff())
            .when(is_transient)
            .notify(|err: &sqlx::Error, delay: Duration| {
                warn!(
                    "Transient database error in {} (retrying in {:?}, max {} attempts): {}",
                    label, delay, attempts, err
                );
            })
            .await
            .map_err(|err| {
                if is_transient(&err) {
                    DbError::RetriesExhausted {
                        attempts,
                        source: err,
                    }
                } else {
                    DbError::Sqlx(err)
                }
            })
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let pool = &self.pool;
        self.retrying(sql, || async move {
            bind_query(sqlx::query(sql), params)
                .execute(pool)
                .await
                .map(|result| result.rows_affected())
        })
        .await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqliteRow>, DbError> {
        let pool = &self.pool;
        self.retrying(sql, || async move {
            bind_query(sqlx::query(sql), params).fetch_all(pool).await
        })
        .await
    }

    pub async fn fetch_optional(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<SqliteRow>, DbError> {
        let pool = &self.pool;
        self.retrying(sql, || async move {
            bind_query(sqlx::query(sql), params).fetch_optional(pool).await
        })
        .await
    }

    pub async fn fetch_all_as<T>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<T>, DbError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let pool = &self.pool;
        self.retrying(sql, || async move {
            bind_query_as(sqlx::query_as::<_, T>(sql), params)
                .fetch_all(pool)
                .await
        })
        .await
    }

    pub async fn begin(&self) -> Result<UnitOfWork, DbError> {
        let pool = &self.pool;
        let tx = self.retrying("begin", || pool.begin()).await?;
        Ok(UnitOfWork { tx })
    }
}

/// Never retried. Dropping it without `commit` rolls back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let result = bind_query(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn bind_query<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params.iter().fold(query, |query, param| match param {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Int(value) => query.bind(*value),
        SqlValue::Text(value) => query.bind(value.as_str()),
        SqlValue::Bool(value) => query.bind(*value),
    })
}

fn bind_query_as<'q, T>(
    query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
    params.iter().fold(query, |query, param| match param {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Int(value) => query.bind(*value),
        SqlValue::Text(value) => query.bind(value.as_str()),
        SqlValue::Bool(value) => query.bind(*value),
    })
}
