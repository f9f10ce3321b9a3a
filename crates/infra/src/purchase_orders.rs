//! Application service for purchase orders.
//!
//! Wraps [`CommandDispatcher`] with one method per order operation, stamps
//! commands with the current time, and runs goods receiving as a two-step
//! flow: the first call previews the reconciliation and, when quantities
//! disagree with the order, stops and returns the discrepancies; the second
//! call carries the acknowledgement and commits only if the order has not
//! changed since the preview.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use procurely_core::{AggregateId, AggregateRoot, ExpectedVersion, TenantId, UserId};
use procurely_events::{EventBus, EventEnvelope};
use procurely_purchasing::{
    AGGREGATE_TYPE, AddLine, ApprovalPolicy, Approve, Cancel, Complete, CompletionDecision,
    ConfirmBySupplier, CreatePurchaseOrder, IncomingQuantities, OrderLifecycle, OrderStatus,
    Priority, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId, ReceiptOutcome,
    RecordInvoice, RecordReceipt, SendToSupplier, SetDispatchBlocked, SubmitOrder, SupplierId,
};

pub use procurely_purchasing::NewLine;

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchaseOrder {
    pub number: String,
    pub supplier_id: SupplierId,
    pub priority: Priority,
    pub lines: Vec<NewLine>,
}

/// One receiving session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveGoods {
    pub quantities: IncomingQuantities,
    pub received_by: UserId,
    /// Order version the person acknowledged discrepancies at, if they did.
    pub acknowledged_at: Option<u64>,
}

/// Reconciliation of a receipt against the order as of `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptPreview {
    pub outcome: ReceiptOutcome,
    pub decision: CompletionDecision,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivingResult {
    /// Nothing was written; resubmit with `acknowledged_at = Some(preview.version)`.
    AwaitingAcknowledgement { preview: ReceiptPreview },
    Committed {
        preview: ReceiptPreview,
        status: OrderStatus,
        events: Vec<StoredEvent>,
    },
}

#[derive(Debug)]
pub struct PurchaseOrderService<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    approval_policy: ApprovalPolicy,
    lifecycle: OrderLifecycle,
}

impl<S, B> PurchaseOrderService<S, B> {
    pub fn new(dispatcher: CommandDispatcher<S, B>, approval_policy: ApprovalPolicy) -> Self {
        Self {
            dispatcher,
            approval_policy,
            lifecycle: OrderLifecycle::new(),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.approval_policy
    }

    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.lifecycle.can_transition_str(from, to)
    }

    pub fn next_valid_states(&self, from: &str) -> &'static [OrderStatus] {
        self.lifecycle.next_valid_states_str(from)
    }
}

impl<S, B> PurchaseOrderService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn execute(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
        expected: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch_expecting::<PurchaseOrder>(
            tenant_id,
            order_id.0,
            AGGREGATE_TYPE,
            command,
            expected,
            |_t, aggregate_id| PurchaseOrder::empty(PurchaseOrderId::new(aggregate_id)),
        )
    }

    fn dispatch(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.execute(tenant_id, order_id, command, ExpectedVersion::Any)
    }

    pub fn load_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrder, DispatchError> {
        let order = self.dispatcher.load(tenant_id, order_id.0, |_t, aggregate_id| {
            PurchaseOrder::empty(PurchaseOrderId::new(aggregate_id))
        })?;
        if !order.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(order)
    }

    /// Create a draft order with its lines in a single append. A rejected
    /// line leaves no trace of the order.
    pub fn create_order(
        &self,
        tenant_id: TenantId,
        order: NewPurchaseOrder,
    ) -> Result<PurchaseOrderId, DispatchError> {
        let order_id = PurchaseOrderId::new(AggregateId::new());
        let line_count = order.lines.len();

        let command = CreatePurchaseOrder::new(
            tenant_id,
            order_id,
            order.number,
            order.supplier_id,
            Utc::now(),
        )
        .with_priority(order.priority)
        .with_lines(order.lines)
        .with_approval_policy(self.approval_policy);

        self.execute(
            tenant_id,
            order_id,
            PurchaseOrderCommand::CreatePurchaseOrder(command),
            ExpectedVersion::Exact(0),
        )?;

        info!(%tenant_id, %order_id, lines = line_count, "purchase order created");
        Ok(order_id)
    }

    pub fn add_line(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        line: NewLine,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::AddLine(AddLine {
                tenant_id,
                order_id,
                sku: line.sku,
                description: line.description,
                quantity: line.quantity,
                unit_price: line.unit_price,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Submit a draft; returns `pending_approval` or `approved`.
    pub fn submit(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::SubmitOrder(SubmitOrder {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    pub fn approve(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        approved_by: UserId,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::Approve(Approve {
                tenant_id,
                order_id,
                approved_by,
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    pub fn cancel(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        reason: impl Into<String>,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::Cancel(Cancel {
                tenant_id,
                order_id,
                reason: reason.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    pub fn set_dispatch_blocked(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        blocked: bool,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::SetDispatchBlocked(SetDispatchBlocked {
                tenant_id,
                order_id,
                blocked,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn send_to_supplier(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::SendToSupplier(SendToSupplier {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    pub fn confirm_by_supplier(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        supplier_reference: Option<String>,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::ConfirmBySupplier(ConfirmBySupplier {
                tenant_id,
                order_id,
                supplier_reference,
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    /// Reconcile `quantities` against the current order without writing anything.
    pub fn preview_receipt(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        quantities: &IncomingQuantities,
        acknowledged: bool,
    ) -> Result<ReceiptPreview, DispatchError> {
        let order = self.load_order(tenant_id, order_id)?;
        if !order.status().accepts_receipts() {
            return Err(DispatchError::InvariantViolation(format!(
                "cannot receive goods for a {} purchase order",
                order.status()
            )));
        }
        if quantities.values().all(|qty| *qty == 0) {
            return Err(DispatchError::Validation("nothing to receive".to_string()));
        }

        let outcome = order.preview_receipt(quantities)?;
        let decision = order.completion_decision(&outcome, acknowledged)?;
        Ok(ReceiptPreview {
            outcome,
            decision,
            version: order.version(),
        })
    }

    /// Record a receiving session.
    ///
    /// Without an acknowledgement, a receipt with discrepancies returns
    /// [`ReceivingResult::AwaitingAcknowledgement`]. With one, the receipt
    /// commits only if the order is still at the acknowledged version;
    /// otherwise the call fails with [`DispatchError::Concurrency`].
    pub fn receive_goods(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        receipt: ReceiveGoods,
    ) -> Result<ReceivingResult, DispatchError> {
        let acknowledged = receipt.acknowledged_at.is_some();
        let preview = self.preview_receipt(tenant_id, order_id, &receipt.quantities, acknowledged)?;

        let status = match preview.decision {
            CompletionDecision::RequireAcknowledgement => {
                warn!(
                    %tenant_id,
                    %order_id,
                    discrepancies = preview.outcome.summary.items_with_discrepancies,
                    "receipt awaiting acknowledgement"
                );
                return Ok(ReceivingResult::AwaitingAcknowledgement { preview });
            }
            CompletionDecision::Proceed { target_status } => target_status,
        };

        let expected = ExpectedVersion::Exact(receipt.acknowledged_at.unwrap_or(preview.version));
        let events = self.execute(
            tenant_id,
            order_id,
            PurchaseOrderCommand::RecordReceipt(RecordReceipt {
                tenant_id,
                order_id,
                quantities: receipt.quantities,
                acknowledged,
                received_by: receipt.received_by,
                occurred_at: Utc::now(),
            }),
            expected,
        )?;

        info!(
            %tenant_id,
            %order_id,
            status = %status,
            fully_received = preview.outcome.summary.fully_received,
            discrepancies = preview.outcome.summary.items_with_discrepancies,
            "goods receipt committed"
        );
        Ok(ReceivingResult::Committed {
            preview,
            status,
            events,
        })
    }

    pub fn record_invoice(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        invoice_reference: impl Into<String>,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::RecordInvoice(RecordInvoice {
                tenant_id,
                order_id,
                invoice_reference: invoice_reference.into(),
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    pub fn complete(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<OrderStatus, DispatchError> {
        self.dispatch(
            tenant_id,
            order_id,
            PurchaseOrderCommand::Complete(Complete {
                tenant_id,
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.status_changed(tenant_id, order_id)
    }

    fn status_changed(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
    ) -> Result<OrderStatus, DispatchError> {
        let status = self.load_order(tenant_id, order_id)?.status();
        info!(%tenant_id, %order_id, status = %status, "purchase order status changed");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use procurely_events::InMemoryEventBus;
    use procurely_purchasing::LineItemId;

    use crate::event_store::InMemoryEventStore;

    type Service = PurchaseOrderService<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn service() -> Service {
        let dispatcher = CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        );
        PurchaseOrderService::new(dispatcher, ApprovalPolicy::default())
    }

    fn order(lines: &[(i64, u64)]) -> NewPurchaseOrder {
        NewPurchaseOrder {
            number: "PO-1001".to_string(),
            supplier_id: SupplierId::new(AggregateId::new()),
            priority: Priority::High,
            lines: lines
                .iter()
                .enumerate()
                .map(|(idx, (quantity, unit_price))| NewLine {
                    sku: format!("SKU-{idx}"),
                    description: String::new(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect(),
        }
    }

    fn confirmed(service: &Service, tenant_id: TenantId, lines: &[(i64, u64)]) -> PurchaseOrderId {
        let order_id = service.create_order(tenant_id, order(lines)).unwrap();
        assert_eq!(service.submit(tenant_id, order_id).unwrap(), OrderStatus::Approved);
        service.send_to_supplier(tenant_id, order_id).unwrap();
        service.confirm_by_supplier(tenant_id, order_id, None).unwrap();
        order_id
    }

    fn receipt(pairs: &[(u32, i64)], acknowledged_at: Option<u64>) -> ReceiveGoods {
        ReceiveGoods {
            quantities: pairs.iter().map(|(id, qty)| (LineItemId(*id), *qty)).collect(),
            received_by: UserId::new(),
            acknowledged_at,
        }
    }

    #[test]
    fn submission_above_threshold_needs_approval() {
        let service = service();
        let tenant_id = TenantId::new();
        let order_id = service.create_order(tenant_id, order(&[(5, 50_000)])).unwrap();

        assert_eq!(service.submit(tenant_id, order_id).unwrap(), OrderStatus::PendingApproval);
        assert!(service.load_order(tenant_id, order_id).unwrap().approval_required());
        assert_eq!(
            service.approve(tenant_id, order_id, UserId::new()).unwrap(),
            OrderStatus::Approved
        );
    }

    #[test]
    fn rejected_line_leaves_no_order_behind() {
        let service = service();
        let tenant_id = TenantId::new();

        let err = service
            .create_order(tenant_id, order(&[(5, 100), (0, 100)]))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Validation(_)));
        let stored = service
            .dispatcher()
            .store()
            .load_tenant(tenant_id, AGGREGATE_TYPE)
            .unwrap();
        assert!(stored.is_empty());
    }

    #[test]
    fn order_and_lines_are_stored_as_one_batch() {
        let service = service();
        let tenant_id = TenantId::new();

        let order_id = service
            .create_order(tenant_id, order(&[(5, 100), (2, 300)]))
            .unwrap();

        let stored = service
            .dispatcher()
            .store()
            .load_stream(tenant_id, order_id.0)
            .unwrap();
        let types: Vec<&str> = stored.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            [
                "purchasing.order.created",
                "purchasing.order.line_added",
                "purchasing.order.line_added"
            ]
        );
        let order = service.load_order(tenant_id, order_id).unwrap();
        assert_eq!(order.total_amount(), 1_100);
        assert_eq!(order.lines().len(), 2);
    }

    #[test]
    fn exact_receipt_commits_straight_to_fully_received() {
        let service = service();
        let tenant_id = TenantId::new();
        let order_id = confirmed(&service, tenant_id, &[(4, 1_000), (2, 1_000)]);

        let result = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 4), (2, 2)], None))
            .unwrap();

        let ReceivingResult::Committed { status, events, .. } = result else {
            panic!("expected commit");
        };
        assert_eq!(status, OrderStatus::FullyReceived);
        assert_eq!(events.len(), 1);
        assert!(service.load_order(tenant_id, order_id).unwrap().invoice_required());
    }

    #[test]
    fn discrepancy_waits_for_acknowledgement() {
        let service = service();
        let tenant_id = TenantId::new();
        let order_id = confirmed(&service, tenant_id, &[(10, 1_000)]);

        let first = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 6)], None))
            .unwrap();
        let ReceivingResult::AwaitingAcknowledgement { preview } = first else {
            panic!("expected acknowledgement gate");
        };
        assert_eq!(preview.outcome.summary.items_with_discrepancies, 1);
        assert_eq!(
            service.load_order(tenant_id, order_id).unwrap().status(),
            OrderStatus::SupplierConfirmed
        );

        let second = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 6)], Some(preview.version)))
            .unwrap();
        assert!(matches!(
            second,
            ReceivingResult::Committed { status: OrderStatus::PartiallyReceived, .. }
        ));
    }

    #[test]
    fn all_zero_receipt_is_rejected() {
        let service = service();
        let tenant_id = TenantId::new();
        let order_id = confirmed(&service, tenant_id, &[(10, 1_000)]);

        let err = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 0)], None))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn lifecycle_queries_use_wire_names() {
        let service = service();
        assert!(service.can_transition("draft", "pending_approval"));
        assert!(!service.can_transition("completed", "draft"));
        assert!(!service.can_transition("bogus", "draft"));
        assert_eq!(
            service.next_valid_states("partially_received"),
            &[OrderStatus::FullyReceived]
        );
        assert!(service.next_valid_states("unknown").is_empty());
    }

    #[test]
    fn missing_order_is_not_found() {
        let service = service();
        let err = service
            .load_order(TenantId::new(), PurchaseOrderId::new(AggregateId::new()))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }
}
