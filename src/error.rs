//! Error taxonomy for the fund pipeline.
//!
//! Recovery is always local: a failed poll skips the tick, a failed order
//! drops the signal. Only configuration errors abort the process.

use thiserror::Error;

/// Failures surfaced by the analytics store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Retryable: connection loss, deadline expiry, lock contention.
    #[error("transient store error: {0}")]
    Transient(String),
    /// Deterministic: malformed query, schema mismatch. Never retried.
    #[error("permanent query error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Failures surfaced by the order gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Deterministic rejection: invalid parameter, kill-switched account,
    /// insufficient balance. Retrying cannot help.
    #[error("gateway rejected: {0}")]
    Rejected(String),
    /// Network-class failure. The caller decides whether to retry; the
    /// default policy is no retry (the signal is gone).
    #[error("gateway transient: {0}")]
    Transient(String),
}

impl GatewayError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, GatewayError::Rejected(_))
    }
}

/// Why the sizing engine declined a signal. Not an error: counted, never
/// surfaced as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    KillSwitch,
    Expired,
    UnderThreshold,
    NotActionable,
    DailyLimit,
    MaxOpen,
    MaxConcurrent,
    BelowMin,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::KillSwitch => "KILL_SWITCH",
            RejectReason::Expired => "EXPIRED",
            RejectReason::UnderThreshold => "UNDER_THRESHOLD",
            RejectReason::NotActionable => "NOT_ACTIONABLE",
            RejectReason::DailyLimit => "DAILY_LIMIT",
            RejectReason::MaxOpen => "MAX_OPEN",
            RejectReason::MaxConcurrent => "MAX_CONCURRENT",
            RejectReason::BelowMin => "BELOW_MIN",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
