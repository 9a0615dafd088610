//! TransactionalStore port - ジョブキューの正本（source of truth）
//!
//! ストアが提供するもの：
//! - データベース単位の接続（session）
//! - トランザクション（begin / commit / rollback）
//! - 行ロックを取らない者を待たせない claim（lock-skip）
//! - 非同期通知の配送
//!
//! # 設計原則
//! - claim + delete + execute + commit が 1 ジョブあたり 1 つの原子単位
//! - ロック済みの行は待たずにスキップする（lock-wait ではなく lock-skip）
//! - invocation は単独でも原子的（失敗したら savepoint まで戻す）

use async_trait::async_trait;

use crate::domain::{ClaimedJob, Invocation, JobId, StatementStatus, StoreError};

/// One row of the claim projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRow {
    pub id: JobId,
    pub procedure: String,
    /// Comma-joined rendered arguments; `None` when the job has none.
    pub arguments: Option<String>,
}

impl From<ClaimRow> for ClaimedJob {
    fn from(row: ClaimRow) -> Self {
        ClaimedJob {
            id: row.id,
            procedure: row.procedure,
            rendered_arguments: row.arguments,
        }
    }
}

/// Status and rows of one executed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult<R> {
    pub status: StatementStatus,
    pub rows: Vec<R>,
}

impl<R> QueryResult<R> {
    pub fn select(rows: Vec<R>) -> Self {
        Self {
            status: StatementStatus::Select,
            rows,
        }
    }

    pub fn empty() -> Self {
        Self::select(Vec::new())
    }
}

/// Entry point of the store: binds a worker to one database.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn connect(&self, database: &str) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// A connection bound to one database.
#[async_trait]
pub trait StoreSession: Send {
    async fn begin(&mut self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Deliver notifications raised by committed transactions.
    ///
    /// Returns how many were delivered.
    async fn process_notifications(&mut self) -> Result<usize, StoreError>;
}

/// One open transaction.
///
/// Dropping a transaction without `commit` rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock the best unlocked row by `(priority, id)`, delete it and return its projection.
    ///
    /// Rows locked by other in-flight transactions are skipped, never waited on.
    async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError>;

    /// Run one procedure call. On error its effects are already undone and
    /// the transaction can still commit.
    async fn invoke(&mut self, invocation: &Invocation) -> Result<StatementStatus, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
