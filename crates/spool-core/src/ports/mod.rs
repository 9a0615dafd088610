//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（ストア・プロセス起動・ステータス報告）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ストアが source of truth（正本）。worker 間の調整はストアのロックだけで行う
//! - worker はメモリ上の状態を共有しない
//! - ステータス報告は副チャネル（失敗しても本処理に影響しない）

pub mod event_sink;
pub mod spawner;
pub mod store;

// 主要な trait を再エクスポート
pub use self::event_sink::{
    EventSink, FanoutEventSink, NoopEventSink, RecordingEventSink, TracingEventSink,
};
pub use self::spawner::{StartupStatus, WorkerHandle, WorkerRegistration, WorkerSpawner};
pub use self::store::{ClaimRow, QueryResult, StoreSession, StoreTransaction, TransactionalStore};
