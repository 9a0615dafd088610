//! spool-core
//!
//! Transactional job-queue consumer: workers bound to one database drain a
//! priority queue, one job per transaction, and exit when it is empty.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, invocation, state, errors, events, report）
//! - **ports**: 抽象化レイヤー（TransactionalStore, WorkerSpawner, EventSink）
//! - **app**: アプリケーションロジック（dequeue, executor, drain_loop, worker, supervisor）
//! - **impls**: 実装（InMemoryStore, TokioSpawner, PgStore）
//! - **config**: TOML + 環境変数による設定
//! - **observability**: tracing の初期化と集計ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{DrainLoop, WorkerExit, WorkerSummary, WorkerSupervisor, run_worker};
pub use config::{ConfigError, ExecutionFailurePolicy, PoolConfig, SpoolConfig};
pub use domain::{
    ClaimedJob, JobId, LaunchError, LaunchErrorCode, NewJob, ProcessId, WorkerError,
    WorkerIdentity,
};
