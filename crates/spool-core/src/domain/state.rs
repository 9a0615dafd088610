//! State - worker と drain loop の状態
//!
//! # WorkerState
//! - starting: 起動済み、確認待ち
//! - running: drain loop 実行中
//! - idle_exit: キューが空になり正常終了
//! - fatal_exit: 回復不能なエラーで終了
//!
//! # DrainState
//! - Idle → Claiming → Executing → Idle（ジョブあり）
//! - Idle → Claiming → Drained（空、終端）

use serde::{Deserialize, Serialize};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    IdleExit,
    FatalExit,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::IdleExit | WorkerState::FatalExit)
    }

    /// Allowed transitions; everything else is a bug in the caller.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, FatalExit) | (Running, IdleExit) | (Running, FatalExit)
        )
    }
}

/// Position of the drain loop inside one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    Idle,
    Claiming,
    Executing,
    Drained,
}

impl DrainState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DrainState::Drained)
    }

    pub fn can_transition_to(self, next: DrainState) -> bool {
        use DrainState::*;
        matches!(
            (self, next),
            (Idle, Claiming) | (Claiming, Executing) | (Claiming, Drained) | (Executing, Idle)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_lifecycle_transitions() {
        assert!(WorkerState::Starting.can_transition_to(WorkerState::Running));
        assert!(WorkerState::Running.can_transition_to(WorkerState::IdleExit));
        assert!(WorkerState::Running.can_transition_to(WorkerState::FatalExit));
        assert!(!WorkerState::IdleExit.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Starting.can_transition_to(WorkerState::IdleExit));
        assert!(WorkerState::FatalExit.is_terminal());
    }

    #[test]
    fn drain_cycle_transitions() {
        assert!(DrainState::Idle.can_transition_to(DrainState::Claiming));
        assert!(DrainState::Claiming.can_transition_to(DrainState::Executing));
        assert!(DrainState::Executing.can_transition_to(DrainState::Idle));
        assert!(DrainState::Claiming.can_transition_to(DrainState::Drained));
        assert!(!DrainState::Drained.can_transition_to(DrainState::Claiming));
        assert!(!DrainState::Idle.can_transition_to(DrainState::Executing));
    }
}
