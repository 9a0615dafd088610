//! DrainLoop - キューが空になるまで claim→execute→commit を繰り返す
//!
//! # フロー（1 サイクル = 1 トランザクション）
//! 1. begin
//! 2. DequeueEngine::claim()（空なら commit して終了）
//! 3. JobExecutor::execute()
//! 4. commit
//! 5. 統計を flush、idle を報告、通知を配送
//!
//! 実行失敗の扱いは ExecutionFailurePolicy で決まる:
//! - Fatal: サイクル全体を rollback（ジョブはキューに残る）して worker を終了
//! - Discard: 呼び出しだけ取り消し、claim は commit して次へ

use tracing::{debug, error, trace, warn};

use crate::app::dequeue::DequeueEngine;
use crate::app::executor::JobExecutor;
use crate::app::status::StatusReporter;
use crate::config::ExecutionFailurePolicy;
use crate::domain::{DrainReport, DrainState, JobId, StatusKind, WorkerError};
use crate::ports::{StoreSession, StoreTransaction};

/// How one committed cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Executed(JobId),
    Discarded(JobId),
    /// Nothing left to claim.
    Drained,
}

pub struct DrainLoop {
    session: Box<dyn StoreSession>,
    dequeue: DequeueEngine,
    executor: JobExecutor,
    status: StatusReporter,
    policy: ExecutionFailurePolicy,
    state: DrainState,
    report: DrainReport,
}

impl DrainLoop {
    pub fn new(
        session: Box<dyn StoreSession>,
        status: StatusReporter,
        policy: ExecutionFailurePolicy,
    ) -> Self {
        Self {
            session,
            dequeue: DequeueEngine::new(),
            executor: JobExecutor::new(status.clone()),
            status,
            policy,
            state: DrainState::Idle,
            report: DrainReport::start(),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    /// Totals so far; also valid after `run` returned an error.
    pub fn report(&self) -> &DrainReport {
        &self.report
    }

    /// Drain the queue. Returns once a claim comes back empty.
    pub async fn run(&mut self) -> Result<DrainReport, WorkerError> {
        self.report = DrainReport::start();

        while self.run_cycle().await? != CycleOutcome::Drained {}

        self.report.finish();
        Ok(self.report.clone())
    }

    /// One transaction: claim at most one job and run it.
    ///
    /// Callable again after the queue was drained or a cycle failed; the next
    /// cycle starts from `Idle`.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, WorkerError> {
        if self.state != DrainState::Idle {
            trace!(from = ?self.state, "drain state reset");
            self.state = DrainState::Idle;
        }
        self.transition(DrainState::Claiming);

        let mut txn = self.session.begin().await.map_err(WorkerError::Begin)?;
        self.status.activity(self.dequeue.activity());

        let claimed = match self.dequeue.claim(txn.as_mut()).await {
            Ok(claimed) => claimed,
            Err(err) => {
                error!(error = %err, "claim failed");
                abort(txn).await;
                return Err(err.into());
            }
        };

        let outcome = match claimed {
            None => CycleOutcome::Drained,
            Some(job) => {
                self.transition(DrainState::Executing);
                match self.executor.execute(txn.as_mut(), &job).await {
                    Ok(()) => CycleOutcome::Executed(job.id),
                    Err(source) => {
                        let invocation = job.call_text();
                        let discarded = self.policy == ExecutionFailurePolicy::Discard;
                        self.status.report(StatusKind::JobFailed {
                            job_id: job.id,
                            invocation: invocation.clone(),
                            error: source.to_string(),
                            status_code: source.status_code(),
                            discarded,
                        });

                        if !discarded {
                            error!(job_id = %job.id, %invocation, error = %source, "job failed");
                            abort(txn).await;
                            return Err(WorkerError::Execution {
                                job_id: job.id,
                                invocation,
                                source,
                            });
                        }
                        warn!(job_id = %job.id, %invocation, error = %source, "job failed, discarding it");
                        CycleOutcome::Discarded(job.id)
                    }
                }
            }
        };

        txn.commit().await.map_err(WorkerError::Commit)?;

        self.report.cycles += 1;
        match outcome {
            CycleOutcome::Executed(_) => self.report.executed += 1,
            CycleOutcome::Discarded(_) => self.report.discarded += 1,
            CycleOutcome::Drained => {}
        }
        self.status.report(StatusKind::Stats {
            report: self.report.clone(),
        });
        self.status.idle();

        let delivered = self
            .session
            .process_notifications()
            .await
            .map_err(WorkerError::Notifications)?;
        if delivered > 0 {
            debug!(delivered, "notifications delivered");
        }

        self.transition(match outcome {
            CycleOutcome::Drained => DrainState::Drained,
            _ => DrainState::Idle,
        });
        Ok(outcome)
    }

    fn transition(&mut self, next: DrainState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid drain transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "drain state");
        self.state = next;
    }
}

/// Roll back after a failure; the original error is what gets reported.
async fn abort(txn: Box<dyn StoreTransaction>) {
    if let Err(err) = txn.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::app::status::testing::recording_reporter;
    use crate::domain::{
        ClaimError, ExecutionError, Invocation, NewJob, StatementStatus, StoreError,
    };
    use crate::impls::{InMemoryStore, ProcedureRegistry};
    use crate::ports::{ClaimRow, QueryResult, TransactionalStore};

    fn registry() -> ProcedureRegistry {
        let mut registry = ProcedureRegistry::new();
        registry.register_fn("ok", |_args| Ok(()));
        registry.register_fn("fail", |_args| Err("procedure raised".into()));
        registry
    }

    async fn store_with(jobs: Vec<NewJob>) -> InMemoryStore {
        let store = InMemoryStore::new(registry());
        store.create_database("app");
        for job in jobs {
            store.enqueue("app", job).unwrap();
        }
        store
    }

    async fn drain_loop(store: &InMemoryStore, policy: ExecutionFailurePolicy) -> DrainLoop {
        let (reporter, _sink) = recording_reporter();
        let session = store.connect("app").await.unwrap();
        DrainLoop::new(session, reporter, policy)
    }

    #[tokio::test]
    async fn drains_all_jobs_then_stops() {
        let store = store_with(vec![
            NewJob::new("ok").with_arguments([json!(1)]),
            NewJob::new("ok"),
            NewJob::new("ok").with_arguments([json!("a")]),
        ])
        .await;
        let mut drain = drain_loop(&store, ExecutionFailurePolicy::Fatal).await;

        let report = drain.run().await.unwrap();

        assert_eq!(report.executed, 3);
        assert_eq!(report.cycles, 4);
        assert!(report.finished_at.is_some());
        assert_eq!(drain.state(), DrainState::Drained);
        assert!(store.pending_jobs("app").unwrap().is_empty());
    }

    #[tokio::test]
    async fn draining_an_empty_queue_twice_is_a_no_op() {
        let store = store_with(vec![]).await;
        let mut drain = drain_loop(&store, ExecutionFailurePolicy::Fatal).await;

        let first = drain.run().await.unwrap();
        let second = drain.run().await.unwrap();

        assert_eq!((first.claimed(), first.cycles), (0, 1));
        assert_eq!((second.claimed(), second.cycles), (0, 1));
    }

    #[tokio::test]
    async fn fatal_policy_keeps_failed_job_queued() {
        let store = store_with(vec![
            NewJob::new("fail").with_arguments([json!(7)]).with_priority(0),
            NewJob::new("ok").with_priority(1),
        ])
        .await;
        let mut drain = drain_loop(&store, ExecutionFailurePolicy::Fatal).await;

        let err = drain.run().await.unwrap_err();

        match err {
            WorkerError::Execution {
                invocation, source, ..
            } => {
                assert_eq!(invocation, "fail(7)");
                assert!(matches!(source, ExecutionError::Store(StoreError::Procedure { .. })));
            }
            other => panic!("unexpected error: {other}"),
        }
        let pending: Vec<String> = store
            .pending_jobs("app")
            .unwrap()
            .into_iter()
            .map(|job| job.procedure)
            .collect();
        assert_eq!(pending, vec!["fail".to_string(), "ok".to_string()]);
        assert_eq!(drain.report().claimed(), 0);
    }

    #[tokio::test]
    async fn discard_policy_removes_failed_job_and_continues() {
        let store = store_with(vec![
            NewJob::new("fail").with_priority(0),
            NewJob::new("ok").with_priority(1),
        ])
        .await;
        let (reporter, sink) = recording_reporter();
        let session = store.connect("app").await.unwrap();
        let mut drain = DrainLoop::new(session, reporter, ExecutionFailurePolicy::Discard);

        let report = drain.run().await.unwrap();

        assert_eq!((report.executed, report.discarded), (1, 1));
        assert!(store.pending_jobs("app").unwrap().is_empty());
        assert!(sink.kinds().iter().any(|k| matches!(
            k,
            StatusKind::JobFailed { discarded: true, invocation, .. } if invocation == "fail()"
        )));
    }

    #[tokio::test]
    async fn reports_stats_and_idle_after_each_cycle() {
        let store = store_with(vec![NewJob::new("ok")]).await;
        let (reporter, sink) = recording_reporter();
        let session = store.connect("app").await.unwrap();
        let mut drain = DrainLoop::new(session, reporter, ExecutionFailurePolicy::Fatal);

        drain.run().await.unwrap();

        let kinds = sink.kinds();
        let stats = kinds
            .iter()
            .filter(|k| matches!(k, StatusKind::Stats { .. }))
            .count();
        let idles = kinds.iter().filter(|k| matches!(k, StatusKind::Idle)).count();
        assert_eq!((stats, idles), (2, 2));
    }

    /// Session whose claims always come back with a non-result status.
    struct BrokenClaimSession {
        rollbacks: Arc<Mutex<usize>>,
    }

    struct BrokenClaimTxn {
        rollbacks: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl StoreSession for BrokenClaimSession {
        async fn begin(&mut self) -> Result<Box<dyn StoreTransaction>, StoreError> {
            Ok(Box::new(BrokenClaimTxn {
                rollbacks: self.rollbacks.clone(),
            }))
        }

        async fn process_notifications(&mut self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[async_trait]
    impl StoreTransaction for BrokenClaimTxn {
        async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError> {
            Ok(QueryResult {
                status: StatementStatus::Other(-2),
                rows: vec![],
            })
        }

        async fn invoke(&mut self, _invocation: &Invocation) -> Result<StatementStatus, StoreError> {
            Ok(StatementStatus::Select)
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            panic!("a failed claim must not commit");
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            *self.rollbacks.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn claim_failure_is_fatal_and_rolls_back() {
        let rollbacks = Arc::new(Mutex::new(0));
        let (reporter, _sink) = recording_reporter();
        let mut drain = DrainLoop::new(
            Box::new(BrokenClaimSession {
                rollbacks: rollbacks.clone(),
            }),
            reporter,
            ExecutionFailurePolicy::Discard,
        );

        let err = drain.run().await.unwrap_err();

        assert!(matches!(err, WorkerError::Claim(ClaimError::UnexpectedStatus(-2))));
        assert_eq!(*rollbacks.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn cycles_can_resume_after_the_queue_drained() {
        let store = store_with(vec![]).await;
        let mut drain = drain_loop(&store, ExecutionFailurePolicy::Fatal).await;

        assert_eq!(drain.run_cycle().await.unwrap(), CycleOutcome::Drained);
        assert_eq!(drain.state(), DrainState::Drained);

        let id = store.enqueue("app", NewJob::new("ok")).unwrap();
        assert_eq!(drain.run_cycle().await.unwrap(), CycleOutcome::Executed(id));
        assert_eq!(drain.run_cycle().await.unwrap(), CycleOutcome::Drained);
        assert_eq!(drain.report().executed, 1);
    }

    /// The call that fails for each step, counted from 1.
    #[derive(Clone, Copy, Default)]
    struct Faults {
        begin: Option<usize>,
        commit: Option<usize>,
        notifications: Option<usize>,
    }

    #[derive(Default)]
    struct Calls {
        begins: AtomicUsize,
        notifications: AtomicUsize,
    }

    /// In-memory session with injected failures.
    struct FaultySession {
        inner: Box<dyn StoreSession>,
        faults: Faults,
        calls: Arc<Calls>,
    }

    struct FaultyTxn {
        inner: Box<dyn StoreTransaction>,
        fail_commit: bool,
    }

    fn next_call(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[async_trait]
    impl StoreSession for FaultySession {
        async fn begin(&mut self) -> Result<Box<dyn StoreTransaction>, StoreError> {
            let n = next_call(&self.calls.begins);
            if self.faults.begin == Some(n) {
                return Err(StoreError::Connection("server closed the connection".into()));
            }
            Ok(Box::new(FaultyTxn {
                inner: self.inner.begin().await?,
                fail_commit: self.faults.commit == Some(n),
            }))
        }

        async fn process_notifications(&mut self) -> Result<usize, StoreError> {
            if self.faults.notifications == Some(next_call(&self.calls.notifications)) {
                return Err(StoreError::Connection("notification queue lost".into()));
            }
            self.inner.process_notifications().await
        }
    }

    #[async_trait]
    impl StoreTransaction for FaultyTxn {
        async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError> {
            self.inner.claim_next().await
        }

        async fn invoke(&mut self, invocation: &Invocation) -> Result<StatementStatus, StoreError> {
            self.inner.invoke(invocation).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            if self.fail_commit {
                // dropping the inner transaction rolls it back
                return Err(StoreError::Connection("commit lost".into()));
            }
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    async fn faulty_drain(store: &InMemoryStore, faults: Faults) -> (DrainLoop, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let session = FaultySession {
            inner: store.connect("app").await.unwrap(),
            faults,
            calls: calls.clone(),
        };
        let (reporter, _sink) = recording_reporter();
        (
            DrainLoop::new(Box::new(session), reporter, ExecutionFailurePolicy::Discard),
            calls,
        )
    }

    #[tokio::test]
    async fn begin_failure_is_fatal() {
        let store = store_with(vec![NewJob::new("ok")]).await;
        let (mut drain, calls) = faulty_drain(
            &store,
            Faults {
                begin: Some(1),
                ..Faults::default()
            },
        )
        .await;

        let err = drain.run().await.unwrap_err();

        assert!(matches!(err, WorkerError::Begin(StoreError::Connection(_))));
        assert_eq!(calls.begins.load(Ordering::SeqCst), 1);
        assert_eq!(drain.report().cycles, 0);
        assert_eq!(store.pending_jobs("app").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_failure_is_fatal_and_stops_draining() {
        let store = store_with(vec![NewJob::new("ok"), NewJob::new("ok"), NewJob::new("ok")]).await;
        let (mut drain, calls) = faulty_drain(
            &store,
            Faults {
                commit: Some(2),
                ..Faults::default()
            },
        )
        .await;

        let err = drain.run().await.unwrap_err();

        assert!(matches!(err, WorkerError::Commit(StoreError::Connection(_))));
        assert_eq!(calls.begins.load(Ordering::SeqCst), 2);
        assert_eq!((drain.report().cycles, drain.report().executed), (1, 1));
        assert_eq!(store.pending_jobs("app").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn notification_failure_is_fatal_after_the_commit() {
        let store = store_with(vec![NewJob::new("ok"), NewJob::new("ok")]).await;
        let (mut drain, calls) = faulty_drain(
            &store,
            Faults {
                notifications: Some(1),
                ..Faults::default()
            },
        )
        .await;

        let err = drain.run().await.unwrap_err();

        assert!(matches!(err, WorkerError::Notifications(StoreError::Connection(_))));
        assert_eq!(calls.begins.load(Ordering::SeqCst), 1);
        assert_eq!((drain.report().cycles, drain.report().executed), (1, 1));
        assert_eq!(store.pending_jobs("app").unwrap().len(), 1);
    }
}
