use super::verdict::{AuthorizationVerdict, Outcome, VerdictKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarrierError {
    #[error("barrier expected {expected} parties but received report {received}")]
    PartyOverflow { expected: u32, received: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    /// More parties still have to report.
    Pending,
    /// This report resolved the barrier.
    Resolved,
    /// The barrier was already resolved by a terminal outcome.
    Ignored,
}

/// Joins the parties of one authorization into a single resolution.
///
/// Resolves on the first terminal outcome reported or when all `expected`
/// parties have reported, whichever comes first. Resolves exactly once.
pub struct AuthorizationBarrier<K: VerdictKind> {
    expected: u32,
    completed: AtomicU32,
    result: OnceLock<Outcome<K::FailCode>>,
    notify: Notify,
}

impl<K: VerdictKind> AuthorizationBarrier<K> {
    /// A barrier with zero parties is resolved as `Undecided` right away.
    pub fn new(expected: u32) -> Self {
        let barrier = Self {
            expected,
            completed: AtomicU32::new(0),
            result: OnceLock::new(),
            notify: Notify::new(),
        };
        if expected == 0 {
            let _ = barrier.result.set(Outcome::Undecided);
        }
        barrier
    }

    pub fn expected_parties(&self) -> u32 {
        self.expected
    }

    pub fn completed_parties(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    /// Report that one party finished with `verdict` as the standing outcome.
    pub fn report(&self, verdict: &AuthorizationVerdict<K>) -> Result<ReportStatus, BarrierError> {
        let received = self.completed.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if let Some(resolved) = self.result.get() {
            if resolved.is_terminal() {
                return Ok(ReportStatus::Ignored);
            }
            return Err(BarrierError::PartyOverflow {
                expected: self.expected,
                received,
            });
        }
        let outcome = verdict.outcome();
        if outcome.is_terminal() {
            return Ok(self.resolve(outcome));
        }
        if received > self.expected {
            return Err(BarrierError::PartyOverflow {
                expected: self.expected,
                received,
            });
        }
        if received == self.expected {
            return Ok(self.resolve(outcome));
        }
        Ok(ReportStatus::Pending)
    }

    fn resolve(&self, outcome: Outcome<K::FailCode>) -> ReportStatus {
        let status = if self.result.set(outcome).is_ok() {
            ReportStatus::Resolved
        } else {
            ReportStatus::Ignored
        };
        self.notify.notify_waiters();
        status
    }

    pub fn is_resolved(&self) -> bool {
        self.result.get().is_some()
    }

    pub fn try_result(&self) -> Option<Outcome<K::FailCode>> {
        self.result.get().cloned()
    }

    /// Wait until the barrier resolves.
    pub async fn wait(&self) -> Outcome<K::FailCode> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.result.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verdict::{PublishAuthorization, PublishVerdict};
    use crate::mqtt::DisconnectReasonCode;
    use std::sync::Arc;
    use std::time::Duration;

    type Barrier = AuthorizationBarrier<PublishAuthorization>;

    #[tokio::test]
    async fn zero_parties_resolves_immediately() {
        let barrier = Barrier::new(0);
        assert!(barrier.is_resolved());
        assert_eq!(barrier.wait().await, Outcome::Undecided);
    }

    #[test]
    fn resolves_after_all_parties_report() {
        let barrier = Barrier::new(3);
        let verdict = Arc::new(PublishVerdict::new());
        assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Pending));
        verdict.advance(0);
        verdict.handle(1).continue_to_next().unwrap();
        assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Pending));
        verdict.advance(1);
        assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Resolved));
        assert_eq!(barrier.try_result(), Some(Outcome::Continue));
        assert_eq!(
            barrier.report(&verdict),
            Err(BarrierError::PartyOverflow {
                expected: 3,
                received: 4
            })
        );
    }

    #[test]
    fn terminal_outcome_short_circuits() {
        let barrier = Barrier::new(5);
        let verdict = Arc::new(PublishVerdict::new());
        for turn in 0..2 {
            assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Pending));
            verdict.advance(turn);
        }
        verdict.handle(2).disconnect().unwrap();
        assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Resolved));
        assert!(matches!(
            barrier.try_result(),
            Some(Outcome::Disconnect {
                code: DisconnectReasonCode::NotAuthorized,
                ..
            })
        ));
        for _ in 0..4 {
            assert_eq!(barrier.report(&verdict), Ok(ReportStatus::Ignored));
        }
        assert_eq!(barrier.completed_parties(), 7);
    }

    #[tokio::test]
    async fn waiters_wake_on_resolution() {
        let barrier = Arc::new(Barrier::new(1));
        let verdict = Arc::new(PublishVerdict::new());
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        verdict.handle(0).succeed().unwrap();
        barrier.report(&verdict).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Success);
    }
}
