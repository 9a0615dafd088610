//! Domain model (ids, jobs, invocations, states, errors, status events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod invocation;
pub mod job;
pub mod report;
pub mod state;

pub use errors::{
    ClaimError, ExecutionError, LaunchError, LaunchErrorCode, SpawnError, StoreError, WorkerError,
};
pub use events::{EventSource, StatusEvent, StatusKind};
pub use ids::{JobId, ProcessId, RunId, WorkerIdentity};
pub use invocation::{Invocation, StatementStatus};
pub use job::{
    Argument, ClaimedJob, NewJob, QueuedJob, parse_rendered_arguments, quote_literal,
    render_arguments,
};
pub use report::DrainReport;
pub use state::{DrainState, WorkerState};
