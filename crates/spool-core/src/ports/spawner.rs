//! WorkerSpawner port - worker の登録と起動確認
//!
//! supervisor は register() で worker を登録し、
//! wait_for_startup() で起動結果（Started / Stopped / HostDied）を待つ。
//! 起動後の worker は supervisor から独立して動き、自分で終了する。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ProcessId, SpawnError, WorkerIdentity};

/// What to start: one worker bound to one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub identity: WorkerIdentity,
    pub database: String,
}

/// Outcome of waiting for a registered worker to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStatus {
    Started(ProcessId),
    /// The worker ended before confirming startup.
    Stopped,
    /// The host that runs workers went away while waiting.
    HostDied,
    /// Returned only by a handle polled too early; never a valid wait result.
    NotYetStarted,
}

#[async_trait]
pub trait WorkerHandle: Send {
    async fn wait_for_startup(&mut self) -> StartupStatus;
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Register a worker. Refusal (e.g. no free slot) is not a startup failure.
    async fn register(
        &self,
        registration: WorkerRegistration,
    ) -> Result<Box<dyn WorkerHandle>, SpawnError>;
}
