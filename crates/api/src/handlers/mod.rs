pub mod executions;
pub mod runs;
pub mod webhooks;
pub mod workflows;
