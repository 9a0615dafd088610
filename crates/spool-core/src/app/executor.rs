//! JobExecutor - claim したジョブのプロシージャを実行
//!
//! 実行はサイクルのトランザクション内で行う。
//! 結果集合を返す文（Select）で完了しなければ失敗扱い。

use tracing::{debug, info};

use crate::app::status::StatusReporter;
use crate::domain::{ClaimedJob, ExecutionError, Invocation, StatusKind};
use crate::ports::StoreTransaction;

pub struct JobExecutor {
    status: StatusReporter,
}

impl JobExecutor {
    pub fn new(status: StatusReporter) -> Self {
        Self { status }
    }

    /// Run `procedure(args)` for `job` inside `txn`.
    pub async fn execute(
        &self,
        txn: &mut dyn StoreTransaction,
        job: &ClaimedJob,
    ) -> Result<(), ExecutionError> {
        let invocation = Invocation::for_job(job)?;
        let statement = invocation.statement();

        info!(job_id = %job.id, "job found, id: {} proc: {}", job.id, statement);
        self.status.report(StatusKind::JobStarted {
            job_id: job.id,
            invocation: invocation.to_string(),
        });
        self.status.activity(statement);

        let status = txn.invoke(&invocation).await?;
        if !status.is_select() {
            return Err(ExecutionError::UnexpectedStatus(status.code()));
        }

        debug!(job_id = %job.id, "job finished");
        self.status.report(StatusKind::JobFinished { job_id: job.id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::status::testing::recording_reporter;
    use crate::domain::{JobId, StatementStatus, StoreError};
    use crate::ports::{ClaimRow, QueryResult};
    use async_trait::async_trait;

    /// Records invocations and answers with a fixed status.
    struct ScriptedTxn {
        answer: Result<StatementStatus, String>,
        invoked: Vec<String>,
    }

    impl ScriptedTxn {
        fn answering(answer: Result<StatementStatus, String>) -> Self {
            Self {
                answer,
                invoked: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl StoreTransaction for ScriptedTxn {
        async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError> {
            Ok(QueryResult::empty())
        }

        async fn invoke(&mut self, invocation: &Invocation) -> Result<StatementStatus, StoreError> {
            self.invoked.push(invocation.statement());
            self.answer.clone().map_err(|message| StoreError::Procedure {
                procedure: invocation.procedure().to_string(),
                message,
            })
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn job(procedure: &str, args: Option<&str>) -> ClaimedJob {
        ClaimedJob {
            id: JobId::new(11),
            procedure: procedure.into(),
            rendered_arguments: args.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn runs_rendered_statement_and_reports() {
        let (reporter, sink) = recording_reporter();
        let mut txn = ScriptedTxn::answering(Ok(StatementStatus::Select));

        JobExecutor::new(reporter)
            .execute(&mut txn, &job("send_mail", Some("42,'hello'")))
            .await
            .unwrap();

        assert_eq!(txn.invoked, vec!["SELECT send_mail(42,'hello')".to_string()]);
        let kinds = sink.kinds();
        assert!(matches!(&kinds[0], StatusKind::JobStarted { invocation, .. } if invocation == "send_mail(42,'hello')"));
        assert!(matches!(&kinds[1], StatusKind::Activity { text } if text == "SELECT send_mail(42,'hello')"));
        assert!(matches!(kinds[2], StatusKind::JobFinished { .. }));
    }

    #[tokio::test]
    async fn no_arguments_renders_empty_parens() {
        let (reporter, _sink) = recording_reporter();
        let mut txn = ScriptedTxn::answering(Ok(StatementStatus::Select));

        JobExecutor::new(reporter)
            .execute(&mut txn, &job("refresh", None))
            .await
            .unwrap();

        assert_eq!(txn.invoked, vec!["SELECT refresh()".to_string()]);
    }

    #[tokio::test]
    async fn non_select_status_fails() {
        let (reporter, sink) = recording_reporter();
        let mut txn = ScriptedTxn::answering(Ok(StatementStatus::Other(4)));

        let err = JobExecutor::new(reporter)
            .execute(&mut txn, &job("refresh", None))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(4));
        assert!(!sink
            .kinds()
            .iter()
            .any(|k| matches!(k, StatusKind::JobFinished { .. })));
    }

    #[tokio::test]
    async fn procedure_error_is_propagated() {
        let (reporter, _sink) = recording_reporter();
        let mut txn = ScriptedTxn::answering(Err("boom".into()));

        let err = JobExecutor::new(reporter)
            .execute(&mut txn, &job("explode", Some("1")))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Store(StoreError::Procedure { .. })));
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_invoking() {
        let (reporter, _sink) = recording_reporter();
        let mut txn = ScriptedTxn::answering(Ok(StatementStatus::Select));

        let err = JobExecutor::new(reporter)
            .execute(&mut txn, &job("drop table x; --", None))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::InvalidProcedure(_)));
        assert!(txn.invoked.is_empty());
    }
}
