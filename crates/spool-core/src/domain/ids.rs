//! Domain identifiers (strongly-typed IDs).
//!
//! # ID の種類
//! - **JobId**: ストアが採番する連番（`bigserial` 相当）。キューの tie-break に使う
//! - **ProcessId**: 起動済み worker の識別子
//! - **RunId**: worker 1 回の実行を表す ULID。ログの相関に使う
//!
//! JobId は ULID ではなく整数。キューの全順序 `(priority, id)` が
//! 「採番順 = 投入順」を前提にしているため。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a queued job, assigned by the store in increasing order.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a started worker.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One run of a worker (start → exit).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Identity of a worker inside the configured pool.
///
/// The name is `"{prefix} {index}"`, e.g. `job worker 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub index: u32,
    pub name: String,
}

impl WorkerIdentity {
    pub fn new(prefix: &str, index: u32) -> Self {
        Self {
            index,
            name: format!("{prefix} {index}"),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_order_numerically() {
        let mut ids = vec![JobId::new(12), JobId::new(10), JobId::new(11)];
        ids.sort();
        assert_eq!(ids, vec![JobId::new(10), JobId::new(11), JobId::new(12)]);
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&JobId::new(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&ProcessId::new(7)).unwrap(), "7");

        let back: JobId = serde_json::from_str("42").unwrap();
        assert_eq!(back, JobId::new(42));
    }

    #[test]
    fn worker_identity_uses_prefix_and_index() {
        let identity = WorkerIdentity::new("job worker", 3);
        assert_eq!(identity.to_string(), "job worker 3");
        assert_eq!(identity.index, 3);
    }

    #[test]
    fn run_ids_are_unique() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("run-"));
    }
}
