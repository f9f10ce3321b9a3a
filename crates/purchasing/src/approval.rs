//! Approval rule applied when an order leaves draft.

use serde::{Deserialize, Serialize};

use crate::lifecycle::OrderStatus;

/// Orders above 2000 currency units need approval (amounts are in minor units).
pub const DEFAULT_APPROVAL_THRESHOLD: u64 = 200_000;

/// Decides whether an order must pass through `pending_approval`.
///
/// The state machine accepts both `draft -> pending_approval` and
/// `draft -> approved`; this policy is what picks between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub threshold: u64,
}

impl ApprovalPolicy {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Approval is required strictly above the threshold.
    pub fn requires_approval(&self, total_amount: u64) -> bool {
        total_amount > self.threshold
    }

    /// Status a draft order with `total_amount` is submitted into.
    pub fn submission_target(&self, total_amount: u64) -> OrderStatus {
        if self.requires_approval(total_amount) {
            OrderStatus::PendingApproval
        } else {
            OrderStatus::Approved
        }
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_THRESHOLD)
    }
}
