//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **DequeueEngine**: 1 ジョブの原子的な claim（lock-skip）
//! - **JobExecutor**: claim したジョブのプロシージャ実行
//! - **DrainLoop**: キューが空になるまで claim→execute→commit
//! - **run_worker**: 1 database に束縛された worker のエントリポイント
//! - **WorkerSupervisor**: worker の起動と起動結果の判定

pub mod dequeue;
pub mod drain_loop;
pub mod executor;
pub mod status;
pub mod supervisor;
pub mod worker;

// 主要な型を再エクスポート
pub use self::dequeue::{CLAIM_QUERY, DequeueEngine};
pub use self::drain_loop::{CycleOutcome, DrainLoop};
pub use self::executor::JobExecutor;
pub use self::status::StatusReporter;
pub use self::supervisor::WorkerSupervisor;
pub use self::worker::{WorkerContext, WorkerExit, WorkerSummary, run_worker};
