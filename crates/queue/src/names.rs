//! Queue name constants (spec §4.2).
//!
//! Two durable queues back the whole system: one carries run-level work
//! (`execute this workflow run from its current cursor`), the other carries
//! continuations that resume a blocked run (`remote.poll` / `remote.apply` /
//! `remote.event`). Keeping them separate means a backlog of slow polls
//! never starves fresh run starts.

/// New and resumed workflow runs.
pub const WORKFLOW_RUNS: &str = "workflow-runs";

/// Continuation jobs that resume a blocked run once its remote dispatch settles.
pub const WORKFLOW_CONTINUATIONS: &str = "workflow-continuations";
