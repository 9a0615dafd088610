//! Events - ステータス報告用のイベント
//!
//! worker は進捗をこのイベントで EventSink に流す（fire-and-forget）。
//! sink 側の失敗は worker のエラーモデルに含まれない。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, ProcessId, RunId};
use super::report::DrainReport;
use super::state::WorkerState;

/// Who emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub worker: String,
    pub run_id: RunId,
    pub database: String,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusKind {
    /// Connected and confirmed to the supervisor.
    WorkerInitialized { pid: Option<ProcessId> },

    /// Current activity text (the statement being run).
    Activity { text: String },

    JobStarted { job_id: JobId, invocation: String },

    JobFinished { job_id: JobId },

    JobFailed {
        job_id: JobId,
        invocation: String,
        error: String,
        status_code: Option<i32>,
        /// `true` when the job was removed from the queue anyway.
        discarded: bool,
    },

    /// Between cycles.
    Idle,

    /// Statistics flushed after a committed cycle.
    Stats { report: DrainReport },

    WorkerExited {
        state: WorkerState,
        report: DrainReport,
        /// Why a fatal exit happened.
        error: Option<String>,
    },
}

/// A timestamped status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub at: DateTime<Utc>,
    pub source: EventSource,
    #[serde(flatten)]
    pub kind: StatusKind,
}

impl StatusEvent {
    pub fn now(source: EventSource, kind: StatusKind) -> Self {
        Self {
            at: Utc::now(),
            source,
            kind,
        }
    }
}
