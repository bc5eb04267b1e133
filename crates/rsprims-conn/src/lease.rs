use bytes::Bytes;

/// Admission-control grant received in a LEASE frame.
///
/// `remaining` counts down as requests are sent. The budget is tracked but not
/// enforced; callers decide what to do once it reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Validity window in milliseconds.
    pub ttl: u32,
    /// Requests permitted within `ttl`.
    pub budget: u32,
    pub metadata: Option<Bytes>,
    /// Requests still permitted.
    pub remaining: u32,
}

impl LeaseGrant {
    pub(crate) fn new(ttl: u32, budget: u32, metadata: Option<Bytes>) -> Self {
        Self {
            ttl,
            budget,
            metadata,
            remaining: budget,
        }
    }

    pub(crate) fn record_request(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Returns true once every permitted request has been used.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_and_saturates() {
        let mut lease = LeaseGrant::new(1000, 2, None);
        lease.record_request();
        assert_eq!(lease.remaining, 1);
        lease.record_request();
        lease.record_request();
        assert_eq!(lease.remaining, 0);
        assert!(lease.is_exhausted());
        assert_eq!(lease.budget, 2);
    }
}
