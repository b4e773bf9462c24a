//! Revocation classifier: tells cancel churn apart from losing the
//! clipboard.
//!
//! Compositors send `cancelled` to a data source once per stale
//! bookkeeping pass, which often means once per offered type, even
//! while the source is still the selection. A run of consecutive
//! cancels with no paste request in between is what a real hand-off
//! to another client looks like. The count is a heuristic, so it sits
//! behind [`RevocationClassifier`] and can be swapped out.

/// Classifier state for one offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    /// Offer is live.
    Active,
    /// Saw cancels, waiting for either a request or one more cancel.
    PendingConfirm,
    /// Ownership is gone. Terminal.
    Revoked,
}

/// Decides when a data source has really been replaced.
///
/// Called from the dispatch thread only.
pub trait RevocationClassifier: Send {
    /// Feed a `cancelled` event.
    fn on_revocation(&mut self) -> ClassifierState;

    /// Feed a `send` event. A request proves the offer is still in use.
    fn on_content_request(&mut self) -> ClassifierState;

    fn state(&self) -> ClassifierState;
}

/// Counts consecutive cancels; `threshold` of them in a row revoke.
#[derive(Debug)]
pub struct CancelCounter {
    threshold: u32,
    consecutive: u32,
}

impl CancelCounter {
    /// Two cancels in a row is what compositors have been observed to
    /// send on a real selection change.
    pub const DEFAULT_THRESHOLD: u32 = 2;

    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }
}

impl Default for CancelCounter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}

impl RevocationClassifier for CancelCounter {
    fn on_revocation(&mut self) -> ClassifierState {
        if self.consecutive < self.threshold {
            self.consecutive += 1;
        }
        self.state()
    }

    fn on_content_request(&mut self) -> ClassifierState {
        if self.consecutive < self.threshold {
            self.consecutive = 0;
        }
        self.state()
    }

    fn state(&self) -> ClassifierState {
        if self.consecutive >= self.threshold {
            ClassifierState::Revoked
        } else if self.consecutive > 0 {
            ClassifierState::PendingConfirm
        } else {
            ClassifierState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_active() {
        assert_eq!(CancelCounter::default().state(), ClassifierState::Active);
    }

    #[test]
    fn single_cancel_is_pending() {
        let mut c = CancelCounter::default();
        assert_eq!(c.on_revocation(), ClassifierState::PendingConfirm);
    }

    #[test]
    fn two_cancels_revoke() {
        let mut c = CancelCounter::default();
        c.on_revocation();
        assert_eq!(c.on_revocation(), ClassifierState::Revoked);
    }

    #[test]
    fn request_between_cancels_resets() {
        let mut c = CancelCounter::default();
        c.on_revocation();
        assert_eq!(c.on_content_request(), ClassifierState::Active);
        assert_eq!(c.on_revocation(), ClassifierState::PendingConfirm);
        assert_eq!(c.on_content_request(), ClassifierState::Active);
    }

    #[test]
    fn revoked_is_terminal() {
        let mut c = CancelCounter::default();
        c.on_revocation();
        c.on_revocation();
        assert_eq!(c.on_content_request(), ClassifierState::Revoked);
        assert_eq!(c.on_revocation(), ClassifierState::Revoked);
        assert_eq!(c.state(), ClassifierState::Revoked);
    }

    #[test]
    fn threshold_of_one_revokes_immediately() {
        let mut c = CancelCounter::new(1);
        assert_eq!(c.on_revocation(), ClassifierState::Revoked);
    }

    #[test]
    fn zero_threshold_behaves_as_one() {
        let mut c = CancelCounter::new(0);
        assert_eq!(c.state(), ClassifierState::Active);
        assert_eq!(c.on_revocation(), ClassifierState::Revoked);
    }

    #[test]
    fn higher_threshold_stays_pending() {
        let mut c = CancelCounter::new(3);
        c.on_revocation();
        assert_eq!(c.on_revocation(), ClassifierState::PendingConfirm);
        assert_eq!(c.on_revocation(), ClassifierState::Revoked);
    }
}
