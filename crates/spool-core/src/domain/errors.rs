//! Errors - エラー型と分類
//!
//! # 分類
//! - StoreError: ストア（接続・クエリ・プロシージャ）のエラー
//! - ClaimError: キュー読み出しの失敗。worker にとって常に致命的
//! - ExecutionError: ジョブ実行の失敗。ポリシー次第で致命的 or 破棄して続行
//! - WorkerError: drain loop を止めるエラー
//! - LaunchError: worker 起動の失敗（呼び出し側がリトライを判断）

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::JobId;

/// SQLSTATE for "insufficient resources".
pub const SQLSTATE_INSUFFICIENT_RESOURCES: &str = "53000";

/// Errors raised by a transactional store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database \"{0}\" does not exist")]
    UnknownDatabase(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("function {0} does not exist")]
    UnknownProcedure(String),

    #[error("procedure {procedure} failed: {message}")]
    Procedure { procedure: String, message: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("transaction is already finished")]
    TransactionClosed,

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(#[from] sqlx::Error),
}

/// The queue read did not produce a well-formed result.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("error grabbing next job from queue, returned code: {0}")]
    UnexpectedStatus(i32),

    #[error("error grabbing next job from queue, {0} rows returned")]
    TooManyRows(usize),

    #[error("error grabbing next job from queue: {0}")]
    Store(#[from] StoreError),
}

/// A claimed job's procedure did not complete as a result-producing statement.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid procedure name {0:?}")]
    InvalidProcedure(String),

    #[error("job procedure error, returned code: {0}")]
    UnexpectedStatus(i32),

    #[error("job procedure error: {0}")]
    Store(#[from] StoreError),
}

impl ExecutionError {
    /// Statement status code, when the store returned one.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            ExecutionError::UnexpectedStatus(code) => Some(*code),
            _ => None,
        }
    }
}

/// Errors that end a worker's drain loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not connect to database {database}: {source}")]
    Connect {
        database: String,
        #[source]
        source: StoreError,
    },

    #[error("could not begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("job {job_id} failed running {invocation}: {source}")]
    Execution {
        job_id: JobId,
        invocation: String,
        #[source]
        source: ExecutionError,
    },

    #[error("could not commit transaction: {0}")]
    Commit(#[source] StoreError),

    #[error("could not process notifications: {0}")]
    Notifications(#[source] StoreError),
}

/// A spawner refused to register a worker.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("no free worker slot (capacity {capacity})")]
    NoFreeSlot { capacity: usize },

    #[error("worker host is shut down")]
    HostDown,
}

/// Distinguishes the launch failures for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchErrorCode {
    NotRegistered,
    WorkerStopped,
    HostDied,
}

/// Launch did not end with a running worker.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("could not register worker job: {0}")]
    NotRegistered(#[source] SpawnError),

    #[error("could not start worker job")]
    WorkerStopped,

    #[error("cannot start worker job without postmaster")]
    HostDied,
}

impl LaunchError {
    pub fn code(&self) -> LaunchErrorCode {
        match self {
            LaunchError::NotRegistered(_) => LaunchErrorCode::NotRegistered,
            LaunchError::WorkerStopped => LaunchErrorCode::WorkerStopped,
            LaunchError::HostDied => LaunchErrorCode::HostDied,
        }
    }

    /// SQLSTATE reported to the caller; both startup failures are resource errors.
    pub fn sqlstate(&self) -> Option<&'static str> {
        match self {
            LaunchError::NotRegistered(_) => None,
            LaunchError::WorkerStopped | LaunchError::HostDied => {
                Some(SQLSTATE_INSUFFICIENT_RESOURCES)
            }
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            LaunchError::NotRegistered(_) => None,
            LaunchError::WorkerStopped => Some("More details may be available in the server log."),
            LaunchError::HostDied => {
                Some("Kill all remaining database processes and restart the database.")
            }
        }
    }
}
