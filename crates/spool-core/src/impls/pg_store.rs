//! PostgreSQL-backed transactional store (feature `postgres`).
//!
//! The queue is the `jobs_queue` table created by [`PgStore::install`].
//! Each session owns a single-connection pool, so one worker holds one
//! backend connection. Procedure calls run inside a savepoint: a failed call
//! leaves the transaction usable, and whether to commit the claim is the
//! caller's decision.
//!
//! Notifications raised with `NOTIFY` are delivered by the server at commit,
//! so `process_notifications` has nothing left to do here.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use crate::app::CLAIM_QUERY;
use crate::domain::{Invocation, JobId, NewJob, StatementStatus, StoreError};
use crate::ports::{ClaimRow, QueryResult, StoreSession, StoreTransaction, TransactionalStore};

pub const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS jobs_queue ( \
     id BIGSERIAL PRIMARY KEY, \
     proc TEXT NOT NULL, \
     args JSONB NOT NULL DEFAULT '[]'::jsonb, \
     priority INTEGER NOT NULL DEFAULT 0 \
   ); \
   CREATE INDEX IF NOT EXISTS jobs_queue_order_idx ON jobs_queue (priority, id);";

const SAVEPOINT: &str = "SAVEPOINT spool_invocation";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT spool_invocation";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT spool_invocation";

#[derive(Debug, Clone)]
pub struct PgStore {
    options: PgConnectOptions,
}

impl PgStore {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    /// Server URL such as `postgres://user@host:5432`. The database comes from each connect.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(PgConnectOptions::from_str(url)?))
    }

    async fn pool(&self, database: &str) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(1)
            .connect_with(self.options.clone().database(database))
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("3D000") => {
                    StoreError::UnknownDatabase(database.to_string())
                }
                other => StoreError::Connection(other.to_string()),
            })
    }

    /// Create the queue table in `database` if it is missing.
    #[instrument(skip(self))]
    pub async fn install(&self, database: &str) -> Result<(), StoreError> {
        let pool = self.pool(database).await?;
        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        pool.close().await;
        Ok(())
    }

    #[instrument(skip(self, job), fields(procedure = %job.procedure))]
    pub async fn enqueue(&self, database: &str, job: &NewJob) -> Result<JobId, StoreError> {
        let pool = self.pool(database).await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO jobs_queue (proc, args, priority) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&job.procedure)
        .bind(Json(&job.arguments))
        .bind(job.priority)
        .fetch_one(&pool)
        .await?;
        pool.close().await;
        Ok(JobId::new(id))
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    async fn connect(&self, database: &str) -> Result<Box<dyn StoreSession>, StoreError> {
        let pool = self.pool(database).await?;
        debug!(database, "connected");
        Ok(Box::new(PgSession { pool }))
    }
}

struct PgSession {
    pool: PgPool,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn begin(&mut self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn process_notifications(&mut self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError> {
        let rows = sqlx::query(CLAIM_QUERY).fetch_all(&mut *self.tx).await?;
        let rows = rows
            .into_iter()
            .map(|row| {
                Ok(ClaimRow {
                    id: JobId::new(row.try_get("id")?),
                    procedure: row.try_get("proc")?,
                    arguments: row.try_get("args")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(QueryResult::select(rows))
    }

    async fn invoke(&mut self, invocation: &Invocation) -> Result<StatementStatus, StoreError> {
        sqlx::raw_sql(SAVEPOINT).execute(&mut *self.tx).await?;

        let statement = invocation.statement();
        match sqlx::raw_sql(&statement).execute(&mut *self.tx).await {
            Ok(_) => {
                sqlx::raw_sql(RELEASE_SAVEPOINT).execute(&mut *self.tx).await?;
                Ok(StatementStatus::Select)
            }
            Err(err) => {
                sqlx::raw_sql(ROLLBACK_TO_SAVEPOINT)
                    .execute(&mut *self.tx)
                    .await?;
                Err(StoreError::Procedure {
                    procedure: invocation.procedure().to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
