//! Worker - 1 つの database に束縛された drain worker のエントリポイント
//!
//! connect → 起動確認 → drain → 終了。
//! キューが空になったら自分で終了する（常駐しない）。

use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, error, info, info_span};

use crate::app::drain_loop::DrainLoop;
use crate::app::status::StatusReporter;
use crate::config::ExecutionFailurePolicy;
use crate::domain::{
    DrainReport, EventSource, ProcessId, RunId, StatusEvent, StatusKind, WorkerError,
    WorkerIdentity, WorkerState,
};
use crate::ports::{EventSink, TransactionalStore};

/// Everything one worker needs, handed over by whoever starts it.
#[derive(Clone)]
pub struct WorkerContext {
    pub identity: WorkerIdentity,
    pub database: String,
    pub pid: ProcessId,
    pub store: Arc<dyn TransactionalStore>,
    pub sink: Arc<dyn EventSink>,
    pub policy: ExecutionFailurePolicy,
}

/// How a worker ended.
#[derive(Debug)]
pub struct WorkerExit {
    pub identity: WorkerIdentity,
    pub state: WorkerState,
    pub report: DrainReport,
    pub error: Option<WorkerError>,
}

impl WorkerExit {
    /// Process exit status: 0 when drained, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        exit_status(self.state)
    }

    pub fn summary(&self) -> WorkerSummary {
        WorkerSummary {
            worker: self.identity.name.clone(),
            state: self.state,
            exit_code: self.exit_code(),
            executed: self.report.executed,
            discarded: self.report.discarded,
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

impl WorkerSummary {
    /// Summary carried by a `WorkerExited` event; `None` for any other event.
    pub fn from_event(event: &StatusEvent) -> Option<Self> {
        let StatusKind::WorkerExited {
            state,
            report,
            error,
        } = &event.kind
        else {
            return None;
        };
        Some(Self {
            worker: event.source.worker.clone(),
            state: *state,
            exit_code: exit_status(*state),
            executed: report.executed,
            discarded: report.discarded,
            error: error.clone(),
        })
    }
}

/// Serializable view of a [`WorkerExit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub worker: String,
    pub state: WorkerState,
    pub exit_code: i32,
    pub executed: u64,
    pub discarded: u64,
    pub error: Option<String>,
}

/// Run one worker to completion.
///
/// `confirm_startup` is called once the database connection is up; a worker
/// that fails before that never confirms.
pub async fn run_worker<F>(ctx: WorkerContext, confirm_startup: F) -> WorkerExit
where
    F: FnOnce() + Send,
{
    let run_id = RunId::generate();
    let span = info_span!(
        "worker",
        worker = %ctx.identity,
        database = %ctx.database,
        pid = %ctx.pid,
        %run_id,
    );
    drive(ctx, run_id, confirm_startup).instrument(span).await
}

async fn drive<F>(ctx: WorkerContext, run_id: RunId, confirm_startup: F) -> WorkerExit
where
    F: FnOnce() + Send,
{
    let status = StatusReporter::new(
        ctx.sink.clone(),
        EventSource {
            worker: ctx.identity.name.clone(),
            run_id,
            database: ctx.database.clone(),
        },
    );
    let mut state = WorkerState::Starting;

    let session = match ctx.store.connect(&ctx.database).await {
        Ok(session) => session,
        Err(source) => {
            error!(error = %source, "could not connect to database");
            let error = WorkerError::Connect {
                database: ctx.database.clone(),
                source,
            };
            let mut report = DrainReport::start();
            report.finish();
            return exit(&ctx, &status, &mut state, report, Some(error));
        }
    };

    confirm_startup();
    advance(&mut state, WorkerState::Running);
    info!("job worker initialized for database {}", ctx.database);
    status.report(StatusKind::WorkerInitialized { pid: Some(ctx.pid) });

    let mut drain = DrainLoop::new(session, status.clone(), ctx.policy);
    match drain.run().await {
        Ok(report) => {
            info!(executed = report.executed, discarded = report.discarded, "job worker ended, no more jobs left");
            exit(&ctx, &status, &mut state, report, None)
        }
        Err(error) => {
            error!(%error, "job worker terminated");
            let mut report = drain.report().clone();
            report.finish();
            exit(&ctx, &status, &mut state, report, Some(error))
        }
    }
}

fn exit(
    ctx: &WorkerContext,
    status: &StatusReporter,
    state: &mut WorkerState,
    report: DrainReport,
    error: Option<WorkerError>,
) -> WorkerExit {
    let terminal = match error {
        None => WorkerState::IdleExit,
        Some(_) => WorkerState::FatalExit,
    };
    advance(state, terminal);
    status.report(StatusKind::WorkerExited {
        state: terminal,
        report: report.clone(),
        error: error.as_ref().map(ToString::to_string),
    });
    WorkerExit {
        identity: ctx.identity.clone(),
        state: terminal,
        report,
        error,
    }
}

fn exit_status(state: WorkerState) -> i32 {
    match state {
        WorkerState::IdleExit => 0,
        _ => 1,
    }
}

fn advance(state: &mut WorkerState, next: WorkerState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid worker transition {state:?} -> {next:?}"
    );
    *state = next;
}
