//! Per-worker drain statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Totals of one drain run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Committed cycles, including the final empty one.
    pub cycles: u64,
    /// Jobs whose procedure completed.
    pub executed: u64,
    /// Jobs removed from the queue although their procedure failed.
    pub discarded: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DrainReport {
    pub fn start() -> Self {
        Self {
            cycles: 0,
            executed: 0,
            discarded: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Jobs taken off the queue by this run.
    pub fn claimed(&self) -> u64 {
        self.executed + self.discarded
    }
}

impl Default for DrainReport {
    fn default() -> Self {
        Self::start()
    }
}
