//! TokioSpawner - worker を tokio タスクとして起動する WorkerSpawner
//!
//! # 実装詳細
//! - Semaphore で同時実行スロット数（max_workers）を制限
//! - oneshot で起動確認（connect 成功時に送信、失敗時は送信せずに drop）
//! - watch でホストの生死を配信（shutdown_host() で「ホストが死んだ」状態に）
//! - 実行中の worker の JoinHandle だけを pid ごとに保持する
//!   （終了したタスクは自分のエントリを消す。終了結果は WorkerExited イベントで届く）
//! - wait_for_exit() は実行中の worker の終了を待てる

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Semaphore, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::{WorkerContext, WorkerExit, run_worker};
use crate::config::{ExecutionFailurePolicy, SpoolConfig};
use crate::domain::{ProcessId, SpawnError};
use crate::ports::{
    EventSink, StartupStatus, TransactionalStore, WorkerHandle, WorkerRegistration, WorkerSpawner,
};

const FIRST_PID: u32 = 1000;

type RunningWorkers = Arc<Mutex<HashMap<ProcessId, JoinHandle<WorkerExit>>>>;

fn lock(workers: &RunningWorkers) -> MutexGuard<'_, HashMap<ProcessId, JoinHandle<WorkerExit>>> {
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a worker's entry when its task ends, aborted or not.
struct Deregister {
    workers: RunningWorkers,
    pid: ProcessId,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        // 待っている側が先に取り出していれば何もしない
        lock(&self.workers).remove(&self.pid);
    }
}

pub struct TokioSpawner {
    store: Arc<dyn TransactionalStore>,
    sink: Arc<dyn EventSink>,
    policy: ExecutionFailurePolicy,
    capacity: usize,
    slots: Arc<Semaphore>,
    next_pid: AtomicU32,
    /// `true` once the host is gone.
    host_down: watch::Sender<bool>,
    workers: RunningWorkers,
}

impl TokioSpawner {
    pub fn new(
        store: Arc<dyn TransactionalStore>,
        sink: Arc<dyn EventSink>,
        capacity: usize,
        policy: ExecutionFailurePolicy,
    ) -> Self {
        let (host_down, _) = watch::channel(false);
        Self {
            store,
            sink,
            policy,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            next_pid: AtomicU32::new(FIRST_PID),
            host_down,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(
        store: Arc<dyn TransactionalStore>,
        sink: Arc<dyn EventSink>,
        config: &SpoolConfig,
    ) -> Self {
        Self::new(store, sink, config.max_workers, config.on_execution_failure)
    }

    /// Free worker slots right now.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Simulate losing the host: pending startups report `HostDied`,
    /// running workers are aborted and no new worker is registered.
    pub fn shutdown_host(&self) {
        // ignore send error: no handle may be waiting
        let _ = self.host_down.send(true);
        let running: Vec<_> = lock(&self.workers)
            .values()
            .map(JoinHandle::abort_handle)
            .collect();
        for task in running {
            task.abort();
        }
    }

    /// Workers that have neither ended nor been joined.
    pub fn running_workers(&self) -> usize {
        lock(&self.workers).len()
    }

    /// Wait for a running worker to end. `None` if the pid is not running
    /// (unknown or already ended) or the task was aborted.
    pub async fn wait_for_exit(&self, pid: ProcessId) -> Option<WorkerExit> {
        let join = lock(&self.workers).remove(&pid)?;
        join_worker(pid, join).await
    }

    /// Wait until no worker is running. Returns the exits of the workers that
    /// were still running, in pid order; earlier exits are only reported as
    /// `WorkerExited` events.
    pub async fn join_all(&self) -> Vec<(ProcessId, Option<WorkerExit>)> {
        let mut exits = Vec::new();
        loop {
            let mut pids: Vec<ProcessId> = lock(&self.workers).keys().copied().collect();
            if pids.is_empty() {
                return exits;
            }
            pids.sort();
            for pid in pids {
                // ended in the meantime
                let Some(join) = lock(&self.workers).remove(&pid) else {
                    continue;
                };
                exits.push((pid, join_worker(pid, join).await));
            }
        }
    }
}

async fn join_worker(pid: ProcessId, join: JoinHandle<WorkerExit>) -> Option<WorkerExit> {
    match join.await {
        Ok(exit) => Some(exit),
        Err(err) => {
            warn!(%pid, error = %err, "worker task did not complete");
            None
        }
    }
}

#[async_trait]
impl WorkerSpawner for TokioSpawner {
    async fn register(
        &self,
        registration: WorkerRegistration,
    ) -> Result<Box<dyn WorkerHandle>, SpawnError> {
        if *self.host_down.borrow() {
            return Err(SpawnError::HostDown);
        }
        let permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| SpawnError::NoFreeSlot {
                capacity: self.capacity,
            })?;

        let pid = ProcessId::new(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let (started_tx, started_rx) = oneshot::channel();
        let ctx = WorkerContext {
            identity: registration.identity,
            database: registration.database,
            pid,
            store: self.store.clone(),
            sink: self.sink.clone(),
            policy: self.policy,
        };

        let deregister = Deregister {
            workers: self.workers.clone(),
            pid,
        };

        // the task removes its entry on exit, so insert before it can run
        {
            let mut running = lock(&self.workers);
            let join = tokio::spawn(async move {
                // slot is held until the worker ends
                let _permit = permit;
                let _deregister = deregister;
                run_worker(ctx, move || {
                    let _ = started_tx.send(pid);
                })
                .await
            });
            running.insert(pid, join);
        }
        debug!(%pid, "worker registered");

        Ok(Box::new(TokioWorkerHandle {
            started: Some(started_rx),
            host_down: self.host_down.subscribe(),
            status: StartupStatus::NotYetStarted,
        }))
    }
}

struct TokioWorkerHandle {
    started: Option<oneshot::Receiver<ProcessId>>,
    host_down: watch::Receiver<bool>,
    status: StartupStatus,
}

#[async_trait]
impl WorkerHandle for TokioWorkerHandle {
    async fn wait_for_startup(&mut self) -> StartupStatus {
        let Some(started) = self.started.take() else {
            return self.status;
        };

        self.status = tokio::select! {
            biased;
            _ = host_died(&mut self.host_down) => StartupStatus::HostDied,
            result = started => match result {
                Ok(pid) => StartupStatus::Started(pid),
                Err(_) => StartupStatus::Stopped,
            },
        };
        self.status
    }
}

/// Resolves once the host is down or the spawner is gone.
async fn host_died(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
