//! Gateway-level error type.

use thiserror::Error;

/// Errors surfaced by the dispatch endpoint and result ingress (§4.3, §6).
///
/// Variants carry the stable error codes from spec §6 verbatim so callers
/// (the stepper, HTTP handlers) can match on them without re-stringifying.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("NO_ELIGIBLE_EXECUTOR")]
    NoEligibleExecutor,

    #[error("EXECUTOR_NOT_FOUND")]
    ExecutorNotFound,

    #[error("RESULT_NOT_READY")]
    ResultNotReady,

    #[error("GATEWAY_UNAVAILABLE: {0}")]
    Unavailable(String),
}
