//! Goods-receipt reconciliation.
//!
//! A receiving session proposes quantities per line item. Reconciliation adds
//! them to the cumulative received quantities, flags every line whose new
//! total differs from the ordered quantity (short *and* over), and summarises
//! the result. `evaluate_completion` then gates the status change: any
//! discrepancy must be acknowledged by a person before the order moves on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use procurely_core::{DomainError, DomainResult, ValueObject};

use crate::lifecycle::OrderStatus;
use crate::line::{LineItem, LineItemId};

/// Quantities proposed for one receiving session, keyed by line item.
///
/// Lines without an entry receive nothing in this session.
pub type IncomingQuantities = BTreeMap<LineItemId, i64>;

/// Reconciliation result for a single line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_id: LineItemId,
    pub quantity_ordered: i64,
    pub previously_received: i64,
    pub quantity_to_receive: i64,
}

impl ReceiptLine {
    /// Cumulative received quantity once this receipt commits.
    pub fn new_quantity_received(&self) -> i64 {
        self.previously_received.saturating_add(self.quantity_to_receive)
    }

    /// `|ordered - (received + incoming)|`.
    pub fn discrepancy(&self) -> u64 {
        self.quantity_ordered.abs_diff(self.new_quantity_received())
    }

    pub fn has_discrepancy(&self) -> bool {
        self.discrepancy() != 0
    }

    pub fn is_fully_received(&self) -> bool {
        self.new_quantity_received() >= self.quantity_ordered
    }

    pub fn is_over_received(&self) -> bool {
        self.new_quantity_received() > self.quantity_ordered
    }
}

/// Aggregate view of a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReceiptSummary {
    pub total_items: usize,
    pub fully_received: usize,
    pub items_with_discrepancies: usize,
}

impl ReceiptSummary {
    /// Build the summary from reconciled lines.
    pub fn from_lines(lines: &[ReceiptLine]) -> Self {
        Self {
            total_items: lines.len(),
            fully_received: lines.iter().filter(|l| l.is_fully_received()).count(),
            items_with_discrepancies: lines.iter().filter(|l| l.has_discrepancy()).count(),
        }
    }

    pub fn partially_received(&self) -> usize {
        self.total_items - self.fully_received
    }

    pub fn is_complete_receipt(&self) -> bool {
        self.fully_received == self.total_items && self.items_with_discrepancies == 0
    }
}

impl ValueObject for ReceiptSummary {}

/// Line items after the receipt plus the per-line and aggregate reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    pub updated_line_items: Vec<LineItem>,
    pub lines: Vec<ReceiptLine>,
    pub summary: ReceiptSummary,
}

impl ReceiptOutcome {
    /// Lines the receiving staff must review before proceeding.
    pub fn discrepancies(&self) -> impl Iterator<Item = &ReceiptLine> {
        self.lines.iter().filter(|l| l.has_discrepancy())
    }
}

/// What the caller should do with a reconciled receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CompletionDecision {
    /// Show the discrepancy list and wait for an explicit "proceed" or "revise".
    RequireAcknowledgement,
    /// Request the transition to `target_status` from the lifecycle.
    Proceed { target_status: OrderStatus },
}

impl CompletionDecision {
    pub fn target_status(&self) -> Option<OrderStatus> {
        match self {
            CompletionDecision::RequireAcknowledgement => None,
            CompletionDecision::Proceed { target_status } => Some(*target_status),
        }
    }
}

/// Stateless reconciliation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiptReconciler;

impl ReceiptReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Reconcile `incoming` against `line_items`.
    ///
    /// Rejects negative quantities, on the order or incoming, and quantities
    /// for lines the order does not have. Received quantities are never
    /// decreased and never clamped.
    pub fn record_receipt(
        &self,
        line_items: &[LineItem],
        incoming: &IncomingQuantities,
    ) -> DomainResult<ReceiptOutcome> {
        for item in line_items {
            if item.quantity_ordered < 0 || item.quantity_received < 0 {
                return Err(DomainError::validation(format!(
                    "{} has negative recorded quantities (ordered {}, received {})",
                    item.id, item.quantity_ordered, item.quantity_received
                )));
            }
        }

        for (line_id, quantity) in incoming {
            if *quantity < 0 {
                return Err(DomainError::validation(format!(
                    "quantity to receive must not be negative ({line_id}: {quantity})"
                )));
            }
            if !line_items.iter().any(|item| item.id == *line_id) {
                return Err(DomainError::validation(format!(
                    "receipt references unknown {line_id}"
                )));
            }
        }

        let mut updated_line_items = Vec::with_capacity(line_items.len());
        let mut lines = Vec::with_capacity(line_items.len());

        for item in line_items {
            let quantity_to_receive = incoming.get(&item.id).copied().unwrap_or(0);
            let new_received = item
                .quantity_received
                .checked_add(quantity_to_receive)
                .ok_or_else(|| {
                    DomainError::validation(format!("received quantity overflows for {}", item.id))
                })?;

            lines.push(ReceiptLine {
                line_id: item.id,
                quantity_ordered: item.quantity_ordered,
                previously_received: item.quantity_received,
                quantity_to_receive,
            });

            let mut updated = item.clone();
            updated.quantity_received = new_received;
            updated_line_items.push(updated);
        }

        let summary = ReceiptSummary::from_lines(&lines);

        Ok(ReceiptOutcome {
            updated_line_items,
            lines,
            summary,
        })
    }

    /// Gate the status change that follows a receipt.
    ///
    /// A receipt over zero line items is rejected: its summary is vacuously
    /// complete but there is nothing to transition on.
    pub fn evaluate_completion(
        &self,
        summary: &ReceiptSummary,
        acknowledged: bool,
    ) -> DomainResult<CompletionDecision> {
        if summary.total_items == 0 {
            return Err(DomainError::validation("nothing to receive"));
        }

        if summary.items_with_discrepancies > 0 && !acknowledged {
            return Ok(CompletionDecision::RequireAcknowledgement);
        }

        let target_status = if summary.is_complete_receipt() {
            OrderStatus::FullyReceived
        } else {
            OrderStatus::PartiallyReceived
        };

        Ok(CompletionDecision::Proceed { target_status })
    }
}
