//! `nodes` crate — the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node — built-in and plugin alike — must implement [`ExecutableNode`].
//! The engine crate dispatches execution through this trait object.

pub mod error;
pub mod traits;
pub mod result;
pub mod mock;

pub mod agent_execute;
pub mod condition;
pub mod connector;
pub mod http_request;
pub mod parallel_join;
pub mod shell_run;

pub use error::NodeError;
pub use result::{BlockRequest, NodeOutcome};
pub use traits::{EventEmitter, ExecutableNode, ExecutionContext, NodeRegistry, RuntimeCheckpointer};
