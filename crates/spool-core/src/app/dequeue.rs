//! DequeueEngine - 1 回の原子的な claim
//!
//! # フロー
//! 1. `(priority, id)` 順で先頭の行を非ブロッキングで行ロック（ロック済みはスキップ）
//! 2. 同じトランザクション内でその行を削除
//! 3. id / procedure / 描画済み引数リストを返す

use tracing::{debug, error};

use crate::domain::{ClaimError, ClaimedJob};
use crate::ports::StoreTransaction;

/// Claim query for SQL stores backed by a `jobs_queue(id, proc, args jsonb, priority)` table.
pub const CLAIM_QUERY: &str = "WITH next_job AS ( \
     SELECT id, proc, args FROM jobs_queue \
     ORDER BY priority ASC, id ASC \
     FOR UPDATE SKIP LOCKED \
     LIMIT 1 \
   ), queue_pop AS ( \
     DELETE FROM jobs_queue WHERE id = (SELECT id FROM next_job) \
   ) \
   SELECT id, proc, string_agg(CASE WHEN value ~ '^[0-9]+$' THEN value ELSE quote_literal(value) END, ',') AS args \
   FROM next_job LEFT JOIN LATERAL jsonb_array_elements_text(args) ON TRUE GROUP BY id, proc";

#[derive(Debug, Default, Clone, Copy)]
pub struct DequeueEngine;

impl DequeueEngine {
    pub fn new() -> Self {
        Self
    }

    /// Activity text reported while claiming.
    pub fn activity(&self) -> &'static str {
        CLAIM_QUERY
    }

    /// Claim at most one job inside `txn`.
    ///
    /// Anything but a well-formed read result is an error; the caller must
    /// abort the transaction.
    pub async fn claim(
        &self,
        txn: &mut dyn StoreTransaction,
    ) -> Result<Option<ClaimedJob>, ClaimError> {
        let result = txn.claim_next().await?;

        if !result.status.is_select() {
            error!(code = result.status.code(), "claim did not return a result set");
            return Err(ClaimError::UnexpectedStatus(result.status.code()));
        }
        if result.rows.len() > 1 {
            return Err(ClaimError::TooManyRows(result.rows.len()));
        }

        let claimed = result.rows.into_iter().next().map(ClaimedJob::from);
        match &claimed {
            Some(job) => debug!(job_id = %job.id, procedure = %job.procedure, "claimed job"),
            None => debug!("queue is empty"),
        }
        Ok(claimed)
    }
}
