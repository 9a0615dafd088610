//! Logging setup and pool-level status views.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::app::WorkerSummary;
use crate::domain::WorkerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize tracing for the process, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    };
}

/// Totals over the workers of one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    pub workers: usize,
    pub drained: usize,
    pub failed: usize,
    pub executed: u64,
    pub discarded: u64,
}

impl PoolCounts {
    pub fn from_summaries<'a, I>(summaries: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkerSummary>,
    {
        let mut counts = Self::default();
        for summary in summaries {
            counts.workers += 1;
            match summary.state {
                WorkerState::IdleExit => counts.drained += 1,
                _ => counts.failed += 1,
            }
            counts.executed += summary.executed;
            counts.discarded += summary.discarded;
        }
        counts
    }

    pub fn all_drained(&self) -> bool {
        self.failed == 0
    }
}
