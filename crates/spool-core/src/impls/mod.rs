//! Impls - 実装
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発・テスト用のトランザクショナルストア（ProcedureRegistry 付き）
//! - **TokioSpawner**: worker を tokio タスクとして起動する WorkerSpawner
//! - **PgStore**: PostgreSQL の jobs_queue テーブル（feature `postgres`）

pub mod inmem_store;
#[cfg(feature = "postgres")]
pub mod pg_store;
pub mod tokio_spawner;

// 主要な型を再エクスポート
pub use self::inmem_store::{
    CallContext, InMemoryStore, Notification, Procedure, ProcedureError, ProcedureRegistry,
};
#[cfg(feature = "postgres")]
pub use self::pg_store::PgStore;
pub use self::tokio_spawner::TokioSpawner;
