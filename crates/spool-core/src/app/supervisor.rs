//! WorkerSupervisor - worker の起動
//!
//! 起動するだけで、起動後の worker は追跡しない（worker は自分で終了する）。
//!
//! # 起動結果の対応
//! - Started(pid) → Ok(pid)
//! - Stopped → LaunchError::WorkerStopped
//! - HostDied → LaunchError::HostDied
//! - NotYetStarted → 不変条件違反（panic）

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{info, warn};

use crate::config::PoolConfig;
use crate::domain::{LaunchError, ProcessId, WorkerIdentity};
use crate::ports::{StartupStatus, WorkerRegistration, WorkerSpawner};

pub struct WorkerSupervisor<S> {
    spawner: S,
    pool: PoolConfig,
    launched: AtomicU32,
}

impl<S: WorkerSpawner> WorkerSupervisor<S> {
    pub fn new(spawner: S, pool: PoolConfig) -> Self {
        Self {
            spawner,
            pool,
            launched: AtomicU32::new(0),
        }
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Indices count up from 1 and are never reused by this supervisor, so
    /// the first pool is `1..=pool.size` and a relaunch never shares a name
    /// with a worker that may still be running.
    fn next_identity(&self) -> WorkerIdentity {
        let index = self.launched.fetch_add(1, Ordering::Relaxed) + 1;
        WorkerIdentity::new(&self.pool.name_prefix, index)
    }

    /// Start one worker for `database` and wait until it is running.
    pub async fn launch(&self, database: &str) -> Result<ProcessId, LaunchError> {
        let identity = self.next_identity();
        let registration = WorkerRegistration {
            identity: identity.clone(),
            database: database.to_string(),
        };

        let mut handle = self
            .spawner
            .register(registration)
            .await
            .map_err(|err| {
                warn!(worker = %identity, error = %err, "worker registration refused");
                LaunchError::NotRegistered(err)
            })?;

        match handle.wait_for_startup().await {
            StartupStatus::Started(pid) => {
                info!(worker = %identity, %pid, database, "worker started");
                Ok(pid)
            }
            StartupStatus::Stopped => {
                warn!(worker = %identity, database, "worker stopped before starting");
                Err(LaunchError::WorkerStopped)
            }
            StartupStatus::HostDied => {
                warn!(worker = %identity, database, "worker host died during startup");
                Err(LaunchError::HostDied)
            }
            StartupStatus::NotYetStarted => {
                panic!("unexpected startup status for {identity}: not yet started")
            }
        }
    }

    /// External entry point: a refused registration is a null result, not an error.
    pub async fn launch_entry(&self, database: &str) -> Result<Option<ProcessId>, LaunchError> {
        match self.launch(database).await {
            Ok(pid) => Ok(Some(pid)),
            Err(LaunchError::NotRegistered(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Start `pool.size` workers, one after another. Stops at the first failure.
    pub async fn launch_pool(&self, database: &str) -> Result<Vec<ProcessId>, LaunchError> {
        let mut pids = Vec::with_capacity(self.pool.size as usize);
        for _ in 0..self.pool.size {
            pids.push(self.launch(database).await?);
        }
        Ok(pids)
    }
}
