//! Purchase order status lifecycle.
//!
//! The legal transitions live in a single adjacency table (`TRANSITIONS`);
//! both `can_transition` and `next_valid_states` read from it, so the whole
//! graph can be inspected and tested as data.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use procurely_core::DomainError;

/// Every status a purchase order can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    PendingApproval,
    Approved,
    SentToSupplier,
    SupplierConfirmed,
    PartiallyReceived,
    FullyReceived,
    Invoiced,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Draft,
        OrderStatus::PendingApproval,
        OrderStatus::Approved,
        OrderStatus::SentToSupplier,
        OrderStatus::SupplierConfirmed,
        OrderStatus::PartiallyReceived,
        OrderStatus::FullyReceived,
        OrderStatus::Invoiced,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Wire name (snake_case), identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::PendingApproval => "pending_approval",
            OrderStatus::Approved => "approved",
            OrderStatus::SentToSupplier => "sent_to_supplier",
            OrderStatus::SupplierConfirmed => "supplier_confirmed",
            OrderStatus::PartiallyReceived => "partially_received",
            OrderStatus::FullyReceived => "fully_received",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Statuses in which a goods receipt may be recorded.
    pub fn accepts_receipts(self) -> bool {
        matches!(
            self,
            OrderStatus::SupplierConfirmed | OrderStatus::PartiallyReceived
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

/// Adjacency table: status → statuses it may move to next.
///
/// Terminal statuses map to an empty slice. There are no backward edges.
const TRANSITIONS: [(OrderStatus, &[OrderStatus]); 10] = [
    (
        OrderStatus::Draft,
        &[OrderStatus::PendingApproval, OrderStatus::Approved],
    ),
    (
        OrderStatus::PendingApproval,
        &[OrderStatus::Approved, OrderStatus::Cancelled],
    ),
    (OrderStatus::Approved, &[OrderStatus::SentToSupplier]),
    (OrderStatus::SentToSupplier, &[OrderStatus::SupplierConfirmed]),
    (
        OrderStatus::SupplierConfirmed,
        &[OrderStatus::PartiallyReceived, OrderStatus::FullyReceived],
    ),
    (OrderStatus::PartiallyReceived, &[OrderStatus::FullyReceived]),
    (OrderStatus::FullyReceived, &[OrderStatus::Invoiced]),
    (OrderStatus::Invoiced, &[OrderStatus::Completed]),
    (OrderStatus::Completed, &[]),
    (OrderStatus::Cancelled, &[]),
];

/// Authority on legal status transitions.
///
/// Stateless; construct one wherever it is needed or pass a copy around.
/// Illegal requests yield `false` / an empty slice, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderLifecycle;

impl OrderLifecycle {
    pub fn new() -> Self {
        Self
    }

    /// True iff `to` is in the legal next-state set of `from`.
    pub fn can_transition(&self, from: OrderStatus, to: OrderStatus) -> bool {
        self.next_valid_states(from).contains(&to)
    }

    /// Legal next states of `from` (empty for terminal statuses).
    pub fn next_valid_states(&self, from: OrderStatus) -> &'static [OrderStatus] {
        TRANSITIONS
            .iter()
            .find(|(status, _)| *status == from)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }

    /// String form of [`can_transition`](Self::can_transition); unknown names fail closed.
    pub fn can_transition_str(&self, from: &str, to: &str) -> bool {
        match (from.parse::<OrderStatus>(), to.parse::<OrderStatus>()) {
            (Ok(from), Ok(to)) => self.can_transition(from, to),
            _ => false,
        }
    }

    /// String form of [`next_valid_states`](Self::next_valid_states); unknown names yield nothing.
    pub fn next_valid_states_str(&self, from: &str) -> &'static [OrderStatus] {
        from.parse::<OrderStatus>()
            .map(|status| self.next_valid_states(status))
            .unwrap_or(&[])
    }

    /// Every legal `(from, to)` edge of the graph.
    pub fn transitions(&self) -> impl Iterator<Item = (OrderStatus, OrderStatus)> {
        TRANSITIONS
            .iter()
            .flat_map(|(from, next)| next.iter().map(move |to| (*from, *to)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lifecycle() -> OrderLifecycle {
        OrderLifecycle::new()
    }

    #[test]
    fn table_covers_every_status_exactly_once() {
        for status in OrderStatus::ALL {
            let rows = TRANSITIONS.iter().filter(|(s, _)| *s == status).count();
            assert_eq!(rows, 1, "status {status} must have exactly one row");
        }
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [
            OrderStatus::Draft,
            OrderStatus::PendingApproval,
            OrderStatus::Approved,
            OrderStatus::SentToSupplier,
            OrderStatus::SupplierConfirmed,
            OrderStatus::PartiallyReceived,
            OrderStatus::FullyReceived,
            OrderStatus::Invoiced,
            OrderStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                lifecycle().can_transition(pair[0], pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn draft_may_skip_approval_at_the_state_machine_level() {
        assert!(lifecycle().can_transition(OrderStatus::Draft, OrderStatus::Approved));
        assert!(lifecycle().can_transition(OrderStatus::Draft, OrderStatus::PendingApproval));
    }

    #[test]
    fn only_pending_approval_can_be_cancelled() {
        let sources: Vec<_> = OrderStatus::ALL
            .into_iter()
            .filter(|s| lifecycle().can_transition(*s, OrderStatus::Cancelled))
            .collect();
        assert_eq!(sources, vec![OrderStatus::PendingApproval]);
    }

    #[test]
    fn terminal_statuses_have_no_next_states() {
        for status in OrderStatus::ALL {
            assert_eq!(
                lifecycle().next_valid_states(status).is_empty(),
                status.is_terminal(),
                "{status}"
            );
        }
    }

    #[test]
    fn invoiced_cannot_go_back_to_draft() {
        assert!(!lifecycle().can_transition(OrderStatus::Invoiced, OrderStatus::Draft));
        assert!(!lifecycle().can_transition_str("invoiced", "draft"));
    }

    #[test]
    fn unknown_status_names_fail_closed() {
        assert!(!lifecycle().can_transition_str("shipped", "approved"));
        assert!(!lifecycle().can_transition_str("draft", "shipped"));
        assert!(lifecycle().next_valid_states_str("shipped").is_empty());
        assert!(lifecycle().next_valid_states_str("").is_empty());
    }

    #[test]
    fn string_entry_points_agree_with_typed_ones() {
        assert!(lifecycle().can_transition_str("supplier_confirmed", "fully_received"));
        assert_eq!(
            lifecycle().next_valid_states_str("draft"),
            &[OrderStatus::PendingApproval, OrderStatus::Approved]
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&OrderStatus::SentToSupplier).unwrap();
        assert_eq!(json, "\"sent_to_supplier\"");
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn graph_has_no_backward_edges() {
        for (from, to) in lifecycle().transitions() {
            assert!(from < to, "{from} -> {to} points backwards");
        }
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop::sample::select(OrderStatus::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: can_transition agrees with the edge list for every pair.
        #[test]
        fn can_transition_matches_edge_list(from in any_status(), to in any_status()) {
            let listed = lifecycle().transitions().any(|edge| edge == (from, to));
            prop_assert_eq!(lifecycle().can_transition(from, to), listed);
            if from.is_terminal() {
                prop_assert!(!lifecycle().can_transition(from, to));
            }
        }

        /// Property: arbitrary strings never open a transition unless both are known names.
        #[test]
        fn arbitrary_names_fail_closed(from in "[a-z_]{0,20}", to in "[a-z_]{0,20}") {
            let known = from.parse::<OrderStatus>().is_ok() && to.parse::<OrderStatus>().is_ok();
            if !known {
                prop_assert!(!lifecycle().can_transition_str(&from, &to));
            }
        }
    }
}
