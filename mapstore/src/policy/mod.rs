//! Failure classification and retry planning.
//!
//! The orchestrator records a cause per failed region and, once the queue
//! drains, asks the policy what to do with each. Transient network causes get
//! a delayed retry of the same task; structural diff causes (`BaseMissing`,
//! `DiffUnavailable`) fall back to a full download immediately; integrity
//! failures delete the corrupt file first and then follow the configured
//! integrity policy. Each fallback runs once per attempt cycle; a region
//! that fails again after its fallback stays `DownloadFailed` until the
//! caller retries explicitly.

use std::collections::HashMap;
use std::time::Duration;

use crate::catalog::RegionId;

/// Why a download or diff application failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    NoConnection,
    ServerError,
    FailedIntegrity,
    /// The server has no diff entry for the target version.
    DiffUnavailable,
    /// The diff had no local base file to apply on.
    BaseMissing,
    Cancelled,
}

/// What to do about an integrity failure, per spec an explicitly
/// configurable choice. `FallbackToFull` is the safer default: a corrupt
/// diff output is unlikely to patch cleanly on a second try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityFailurePolicy {
    #[default]
    FallbackToFull,
    RetryDiff,
}

/// One failed region awaiting a retry decision.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub cause: FailureCause,
    /// Automatic attempts already spent in this cycle.
    pub attempts: u32,
}

/// Planned recovery for one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-enqueue the same task after the delay.
    RetryAfter(Duration),
    /// Enqueue a full-data download of the same region immediately.
    FallbackToFull,
    /// Delete the corrupt file, then re-enqueue per the integrity policy.
    DeleteAndRetry { as_full: bool },
    /// Leave the region in `DownloadFailed` for the user to retry.
    GiveUp,
}

/// Per-cause retry decisions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub no_connection_delay: Duration,
    pub server_error_delay: Duration,
    pub max_auto_attempts: u32,
    pub integrity: IntegrityFailurePolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            no_connection_delay: Duration::from_secs(20),
            server_error_delay: Duration::from_secs(30),
            max_auto_attempts: 1,
            integrity: IntegrityFailurePolicy::FallbackToFull,
        }
    }
}

impl RetryPolicy {
    /// Decide an action for a single failure.
    pub fn action_for(&self, record: &FailureRecord) -> RetryAction {
        if record.attempts >= self.max_auto_attempts {
            return RetryAction::GiveUp;
        }
        match record.cause {
            FailureCause::NoConnection => RetryAction::RetryAfter(self.no_connection_delay),
            FailureCause::ServerError => RetryAction::RetryAfter(self.server_error_delay),
            FailureCause::FailedIntegrity => RetryAction::DeleteAndRetry {
                as_full: self.integrity == IntegrityFailurePolicy::FallbackToFull,
            },
            FailureCause::DiffUnavailable | FailureCause::BaseMissing => {
                RetryAction::FallbackToFull
            }
            FailureCause::Cancelled => RetryAction::GiveUp,
        }
    }

    /// Plan recovery for the whole failed set. Regions whose action is
    /// `GiveUp` are not included.
    pub fn plan(
        &self,
        failed: &HashMap<RegionId, FailureRecord>,
    ) -> Vec<(RegionId, RetryAction)> {
        let mut plan: Vec<(RegionId, RetryAction)> = failed
            .iter()
            .filter_map(|(region, record)| {
                let action = self.action_for(record);
                (action != RetryAction::GiveUp).then(|| (region.clone(), action))
            })
            .collect();
        // Deterministic order for tests and logs.
        plan.sort_by(|a, b| a.0.cmp(&b.0));
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cause: FailureCause) -> FailureRecord {
        FailureRecord { cause, attempts: 0 }
    }

    #[test]
    fn test_no_connection_gets_delayed_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.action_for(&record(FailureCause::NoConnection)),
            RetryAction::RetryAfter(policy.no_connection_delay)
        );
    }

    #[test]
    fn test_diff_unavailable_falls_back_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.action_for(&record(FailureCause::DiffUnavailable)),
            RetryAction::FallbackToFull
        );
        assert_eq!(
            policy.action_for(&record(FailureCause::BaseMissing)),
            RetryAction::FallbackToFull
        );
    }

    #[test]
    fn test_integrity_default_falls_back_to_full() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.action_for(&record(FailureCause::FailedIntegrity)),
            RetryAction::DeleteAndRetry { as_full: true }
        );
    }

    #[test]
    fn test_integrity_retry_diff_configuration() {
        let policy = RetryPolicy {
            integrity: IntegrityFailurePolicy::RetryDiff,
            ..Default::default()
        };
        assert_eq!(
            policy.action_for(&record(FailureCause::FailedIntegrity)),
            RetryAction::DeleteAndRetry { as_full: false }
        );
    }

    #[test]
    fn test_attempts_exhausted_gives_up() {
        let policy = RetryPolicy::default();
        let spent = FailureRecord {
            cause: FailureCause::NoConnection,
            attempts: 1,
        };
        assert_eq!(policy.action_for(&spent), RetryAction::GiveUp);
    }

    #[test]
    fn test_cancelled_is_never_auto_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.action_for(&record(FailureCause::Cancelled)),
            RetryAction::GiveUp
        );
    }

    #[test]
    fn test_plan_skips_give_ups_and_sorts() {
        let policy = RetryPolicy::default();
        let failed = HashMap::from([
            ("B".to_string(), record(FailureCause::NoConnection)),
            ("A".to_string(), record(FailureCause::DiffUnavailable)),
            ("C".to_string(), record(FailureCause::Cancelled)),
        ]);
        let plan = policy.plan(&failed);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].0, "A");
        assert_eq!(plan[0].1, RetryAction::FallbackToFull);
        assert_eq!(plan[1].0, "B");
    }
}
