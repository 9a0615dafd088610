//! InMemoryStore - 開発・テスト用のトランザクショナルストア
//!
//! # 学習ポイント
//! - 行ロックは「どのトランザクションが掴んでいるか」の印（locked_by）で表す
//! - claim は印のない先頭行だけを見る（ロック済みは待たずにスキップ）
//! - commit で印の付いた行を削除、rollback / drop で印を外す
//! - プロシージャ呼び出しは savepoint 相当：失敗した呼び出しの通知は捨てる
//!
//! # 使用例
//! ```ignore
//! let mut procedures = ProcedureRegistry::new();
//! procedures.register_fn("send_mail", |args| Ok(()));
//! let store = InMemoryStore::new(procedures);
//! store.create_database("app");
//! store.enqueue("app", NewJob::new("send_mail").with_arguments([42]))?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::{
    Argument, Invocation, JobId, NewJob, QueuedJob, StatementStatus, StoreError,
    parse_rendered_arguments,
};
use crate::ports::{ClaimRow, QueryResult, StoreSession, StoreTransaction, TransactionalStore};

const NOTIFICATION_CAPACITY: usize = 256;

/// An asynchronous notification raised by a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub database: String,
    pub channel: String,
    pub payload: String,
}

/// Error raised by a procedure body.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProcedureError(String);

impl From<&str> for ProcedureError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for ProcedureError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// What a running procedure can see and do besides its arguments.
pub struct CallContext {
    database: String,
    notifications: Vec<Notification>,
}

impl CallContext {
    fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            notifications: Vec::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Queue a notification; delivered only if the call and its transaction succeed.
    pub fn notify(&mut self, channel: impl Into<String>, payload: impl Into<String>) {
        self.notifications.push(Notification {
            database: self.database.clone(),
            channel: channel.into(),
            payload: payload.into(),
        });
    }
}

#[async_trait]
pub trait Procedure: Send + Sync {
    async fn call(&self, ctx: &mut CallContext, args: &[Argument]) -> Result<(), ProcedureError>;
}

struct FnProcedure<F>(F);

#[async_trait]
impl<F> Procedure for FnProcedure<F>
where
    F: Fn(&[Argument]) -> Result<(), ProcedureError> + Send + Sync,
{
    async fn call(&self, _ctx: &mut CallContext, args: &[Argument]) -> Result<(), ProcedureError> {
        (self.0)(args)
    }
}

/// Procedures callable by name.
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Arc<dyn Procedure>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a procedure.
    pub fn register<P>(&mut self, name: impl Into<String>, procedure: P)
    where
        P: Procedure + 'static,
    {
        self.procedures.insert(name.into(), Arc::new(procedure));
    }

    /// Register a synchronous procedure that only looks at its arguments.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Argument]) -> Result<(), ProcedureError> + Send + Sync + 'static,
    {
        self.register(name, FnProcedure(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Procedure>> {
        self.procedures.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.procedures.keys().cloned().collect();
        names.sort();
        names
    }
}

type TxnId = u64;

struct Row {
    job: QueuedJob,
    locked_by: Option<TxnId>,
}

#[derive(Default)]
struct Database {
    /// Keyed by queue order.
    rows: BTreeMap<(i32, JobId), Row>,
    last_id: i64,
}

impl Database {
    fn allocate_id(&mut self) -> JobId {
        self.last_id += 1;
        JobId::new(self.last_id)
    }
}

#[derive(Default)]
struct StoreState {
    databases: HashMap<String, Database>,
    next_txn: TxnId,
    delivered: Vec<Notification>,
}

impl StoreState {
    fn database(&mut self, name: &str) -> Result<&mut Database, StoreError> {
        self.databases
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownDatabase(name.to_string()))
    }
}

struct Inner {
    state: Mutex<StoreState>,
    procedures: ProcedureRegistry,
    notifications: broadcast::Sender<Notification>,
}

/// In-process store with named databases, each holding one job queue.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new(procedures: ProcedureRegistry) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StoreState::default()),
                procedures,
                notifications,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty database. Existing databases are left alone.
    pub fn create_database(&self, name: &str) {
        self.lock().databases.entry(name.to_string()).or_default();
    }

    pub fn enqueue(&self, database: &str, job: NewJob) -> Result<JobId, StoreError> {
        let mut state = self.lock();
        let db = state.database(database)?;
        let id = db.allocate_id();
        let job = QueuedJob::from_new(id, job);
        db.rows.insert(job.order_key(), Row { job, locked_by: None });
        Ok(id)
    }

    /// Insert a row with a caller-chosen id.
    pub fn insert_job(&self, database: &str, job: QueuedJob) -> Result<(), StoreError> {
        let mut state = self.lock();
        let db = state.database(database)?;
        if db.rows.values().any(|row| row.job.id == job.id) {
            return Err(StoreError::Query(format!(
                "duplicate key value violates unique constraint, id {}",
                job.id
            )));
        }
        db.last_id = db.last_id.max(job.id.get());
        db.rows.insert(job.order_key(), Row { job, locked_by: None });
        Ok(())
    }

    /// Rows still in the queue (claimed but uncommitted rows included), in queue order.
    pub fn pending_jobs(&self, database: &str) -> Result<Vec<QueuedJob>, StoreError> {
        let mut state = self.lock();
        let db = state.database(database)?;
        Ok(db.rows.values().map(|row| row.job.clone()).collect())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Every notification delivered so far.
    pub fn delivered_notifications(&self) -> Vec<Notification> {
        self.lock().delivered.clone()
    }

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.inner.procedures
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn connect(&self, database: &str) -> Result<Box<dyn StoreSession>, StoreError> {
        self.lock().database(database)?;
        debug!(database, "session opened");
        Ok(Box::new(InMemorySession {
            store: self.clone(),
            database: database.to_string(),
            committed: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

struct InMemorySession {
    store: InMemoryStore,
    database: String,
    /// Notifications of committed transactions, not yet delivered.
    committed: Arc<Mutex<Vec<Notification>>>,
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn begin(&mut self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let id = {
            let mut state = self.store.lock();
            state.database(&self.database)?;
            state.next_txn += 1;
            state.next_txn
        };
        trace!(txn = id, "begin");
        Ok(Box::new(InMemoryTransaction {
            store: self.store.clone(),
            database: self.database.clone(),
            id,
            claimed: Vec::new(),
            notifications: Vec::new(),
            committed: self.committed.clone(),
            finished: false,
        }))
    }

    async fn process_notifications(&mut self) -> Result<usize, StoreError> {
        let pending: Vec<Notification> = std::mem::take(
            &mut *self
                .committed
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if pending.is_empty() {
            return Ok(0);
        }

        self.store.lock().delivered.extend(pending.iter().cloned());
        for notification in &pending {
            // no subscribers is fine
            let _ = self.store.inner.notifications.send(notification.clone());
        }
        Ok(pending.len())
    }
}

struct InMemoryTransaction {
    store: InMemoryStore,
    database: String,
    id: TxnId,
    /// Rows locked (and deleted, from this transaction's view) by claims.
    claimed: Vec<(i32, JobId)>,
    notifications: Vec<Notification>,
    committed: Arc<Mutex<Vec<Notification>>>,
    finished: bool,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::TransactionClosed)
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        let mut state = self.store.lock();
        if let Ok(db) = state.database(&self.database) {
            for key in self.claimed.drain(..) {
                if let Some(row) = db.rows.get_mut(&key)
                    && row.locked_by == Some(self.id)
                {
                    row.locked_by = None;
                }
            }
        }
        self.finished = true;
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn claim_next(&mut self) -> Result<QueryResult<ClaimRow>, StoreError> {
        self.ensure_open()?;
        let mut state = self.store.lock();
        let db = state.database(&self.database)?;

        let Some((key, row)) = db.rows.iter_mut().find(|(_, row)| row.locked_by.is_none()) else {
            return Ok(QueryResult::empty());
        };
        row.locked_by = Some(self.id);
        let key = *key;
        let claimed = row.job.to_claimed();
        self.claimed.push(key);
        trace!(txn = self.id, job_id = %claimed.id, "row locked");

        Ok(QueryResult::select(vec![ClaimRow {
            id: claimed.id,
            procedure: claimed.procedure,
            arguments: claimed.rendered_arguments,
        }]))
    }

    async fn invoke(&mut self, invocation: &Invocation) -> Result<StatementStatus, StoreError> {
        self.ensure_open()?;
        let procedure = self
            .store
            .inner
            .procedures
            .get(invocation.procedure())
            .ok_or_else(|| StoreError::UnknownProcedure(invocation.procedure().to_string()))?;
        let args = parse_rendered_arguments(invocation.arguments()).map_err(StoreError::Query)?;

        let mut ctx = CallContext::new(&self.database);
        procedure
            .call(&mut ctx, &args)
            .await
            .map_err(|err| StoreError::Procedure {
                procedure: invocation.procedure().to_string(),
                message: err.to_string(),
            })?;

        self.notifications.append(&mut ctx.notifications);
        Ok(StatementStatus::Select)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.ensure_open()?;
        {
            let mut state = this.store.lock();
            let db = state.database(&this.database)?;
            for key in this.claimed.drain(..) {
                if let Some(row) = db.rows.get(&key)
                    && row.locked_by == Some(this.id)
                {
                    db.rows.remove(&key);
                }
            }
        }
        this.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&mut this.notifications);
        this.finished = true;
        trace!(txn = this.id, "commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        this.ensure_open()?;
        this.release();
        trace!(txn = this.id, "rollback");
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.release();
        }
    }
}
