//! Exponential back-off schedules shared by the run queue and the poll
//! continuation queue (spec §4.4.5, §4.2).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Back-off applied when a run-level attempt fails and is requeued.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 1_000, max_delay_ms: 300_000 }
    }
}

impl RetryPolicy {
    /// `attempt_count` is 1-indexed (the attempt that just failed).
    pub fn next_attempt_at(&self, attempt_count: i32) -> DateTime<Utc> {
        let exp = attempt_count.saturating_sub(1).clamp(0, 20) as u32;
        let delay_ms = self.base_delay_ms.saturating_mul(1i64 << exp).min(self.max_delay_ms);
        Utc::now() + ChronoDuration::milliseconds(delay_ms)
    }
}

/// Fixed interval `remote.poll` re-enqueues itself at when the gateway
/// reports `RESULT_NOT_READY` — never tighter than the gateway's own poll
/// cadence, so a slow executor doesn't get hammered.
pub const POLL_RETRY_INTERVAL_MS: i64 = 2_000;

pub fn poll_retry_at() -> DateTime<Utc> {
    Utc::now() + ChronoDuration::milliseconds(POLL_RETRY_INTERVAL_MS)
}
