//! `engine` crate — workflow domain models, DSL validation, v3 graph
//! execution, and the run stepper (C4, spec §3/§4.4).

pub mod continuation;
pub mod dag;
pub mod error;
pub mod graph;
pub mod models;
pub mod stepper;

pub use continuation::ContinuationHandler;
pub use dag::validate_dag;
pub use error::EngineError;
pub use models::{DslVersion, EdgeKind, GraphEdge, NodeDefinition, Trigger, Workflow, WorkflowDefinition, WorkflowStatus};
pub use stepper::{NodeRetryConfig, RunStepper, StepperConfig};
