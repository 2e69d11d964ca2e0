//! Typed error type for the queue crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("db error: {0}")]
    Db(#[from] db::DbError),

    #[error("job payload for '{job_id}' failed to deserialize: {source}")]
    BadPayload {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}
