//! `gateway` crate — the in-memory executor registry and dispatch endpoint
//! (C3, spec §4.3). Owns the `Dispatcher` trait the workflow stepper (the
//! `engine` crate) drives through; the continuation-queue worker that
//! applies results to run state lives in `engine` since it needs both the
//! gateway (for `remote.poll`) and the durable store.

pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod registry;
pub mod types;
pub mod ws;

pub use dispatcher::{Dispatcher, Gateway};
pub use error::GatewayError;
pub use registry::SelectionStrategy;
pub use types::{Dispatch, DispatchKind, InvokeRequest, RemoteEvent, RemoteResult, RemoteResultStatus, Selector};
