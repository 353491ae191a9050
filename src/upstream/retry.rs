//! Retry schedule and HTTP status classification.
//!
//! A request gets `MAX_RETRIES` retries after its first attempt, with
//! exponential backoff: 1s, 2s, 4s.

use std::time::Duration;

/// Retries after the initial attempt (4 attempts total).
pub const MAX_RETRIES: u32 = 3;

/// Base backoff delay; doubles per retry.
pub const RETRY_DELAY_MS: u64 = 1000;

/// How an HTTP status steers the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: hand the response to the coordinator.
    Success,
    /// 5xx or 429: back off and retry.
    Retryable,
    /// 400 or 404: the upstream no longer knows our session; re-mint first.
    StaleSession,
    /// Any other 4xx: fail immediately.
    Fatal,
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        400 | 404 => StatusClass::StaleSession,
        429 => StatusClass::Retryable,
        500..=599 => StatusClass::Retryable,
        _ => StatusClass::Fatal,
    }
}

/// Delay before retry `k` (1-based): `RETRY_DELAY_MS * 2^(k-1)`.
pub fn backoff_delay(base_delay_ms: u64, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(1 << exponent))
}
