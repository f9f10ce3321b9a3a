use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procurely_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId, UserId};
use procurely_events::Event;

use crate::approval::ApprovalPolicy;
use crate::lifecycle::{OrderLifecycle, OrderStatus};
use crate::line::{LineItem, LineItemId};
use crate::receipt::{CompletionDecision, IncomingQuantities, ReceiptOutcome, ReceiptReconciler};

/// Stream type used for purchase order events.
pub const AGGREGATE_TYPE: &str = "purchasing.order";

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Supplier (party) the order is placed with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierId(pub AggregateId);

impl SupplierId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    number: String,
    supplier_id: Option<SupplierId>,
    priority: Priority,
    approval_policy: ApprovalPolicy,
    status: OrderStatus,
    lines: Vec<LineItem>,
    dispatch_blocked: bool,
    approved_by: Option<UserId>,
    cancellation_reason: Option<String>,
    invoice_reference: Option<String>,
    version: u64,
    created: bool,
    lifecycle: OrderLifecycle,
    reconciler: ReceiptReconciler,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            supplier_id: None,
            priority: Priority::Normal,
            approval_policy: ApprovalPolicy::default(),
            status: OrderStatus::Draft,
            lines: Vec::new(),
            dispatch_blocked: false,
            approved_by: None,
            cancellation_reason: None,
            invoice_reference: None,
            version: 0,
            created: false,
            lifecycle: OrderLifecycle::new(),
            reconciler: ReceiptReconciler::new(),
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn dispatch_blocked(&self) -> bool {
        self.dispatch_blocked
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn invoice_reference(&self) -> Option<&str> {
        self.invoice_reference.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Ordered value in minor units, summed over all lines.
    pub fn total_amount(&self) -> u64 {
        self.lines
            .iter()
            .fold(0u64, |acc, line| acc.saturating_add(line.line_total()))
    }

    /// Whether the order must pass through `pending_approval` when submitted.
    pub fn approval_required(&self) -> bool {
        self.approval_policy.requires_approval(self.total_amount())
    }

    pub fn invoice_created(&self) -> bool {
        self.invoice_reference.is_some()
    }

    /// Goods are in and the supplier invoice has not been recorded yet.
    pub fn invoice_required(&self) -> bool {
        self.status == OrderStatus::FullyReceived && !self.invoice_created()
    }

    /// Reconcile a proposed receipt against the current lines without changing state.
    pub fn preview_receipt(&self, incoming: &IncomingQuantities) -> Result<ReceiptOutcome, DomainError> {
        self.reconciler.record_receipt(&self.lines, incoming)
    }

    /// Gate decision for a previewed receipt.
    pub fn completion_decision(
        &self,
        outcome: &ReceiptOutcome,
        acknowledged: bool,
    ) -> Result<CompletionDecision, DomainError> {
        self.reconciler.evaluate_completion(&outcome.summary, acknowledged)
    }

    /// Statuses this order may legally move to next.
    pub fn next_valid_states(&self) -> &'static [OrderStatus] {
        self.lifecycle.next_valid_states(self.status)
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A line placed on an order, either at creation or while in draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub sku: String,
    pub description: String,
    pub quantity: i64,
    /// Minor currency units.
    pub unit_price: u64,
}

/// Command: CreatePurchaseOrder.
///
/// The order and its initial lines are decided together, so a bad line
/// leaves nothing behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: SupplierId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub lines: Vec<NewLine>,
    /// Approval rule in force when the order is created. Never read from the
    /// wire: deserialized commands get the default rule.
    #[serde(skip)]
    approval_policy: ApprovalPolicy,
    pub occurred_at: DateTime<Utc>,
}

impl CreatePurchaseOrder {
    pub fn new(
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        number: impl Into<String>,
        supplier_id: SupplierId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            order_id,
            number: number.into(),
            supplier_id,
            priority: Priority::default(),
            lines: Vec::new(),
            approval_policy: ApprovalPolicy::default(),
            occurred_at,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_lines(mut self, lines: Vec<NewLine>) -> Self {
        self.lines = lines;
        self
    }

    /// Set by the application service from its configuration.
    pub fn with_approval_policy(mut self, approval_policy: ApprovalPolicy) -> Self {
        self.approval_policy = approval_policy;
        self
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        self.approval_policy
    }
}

/// Command: AddLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub sku: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitOrder (leave draft; the approval rule picks the target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetDispatchBlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDispatchBlocked {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub blocked: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SendToSupplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendToSupplier {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmBySupplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmBySupplier {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordReceipt.
///
/// `acknowledged` is the receiving staff's explicit "proceed anyway" after
/// reviewing the discrepancy list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub quantities: IncomingQuantities,
    pub acknowledged: bool,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInvoice {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub invoice_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complete {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    SubmitOrder(SubmitOrder),
    Approve(Approve),
    Cancel(Cancel),
    SetDispatchBlocked(SetDispatchBlocked),
    SendToSupplier(SendToSupplier),
    ConfirmBySupplier(ConfirmBySupplier),
    RecordReceipt(RecordReceipt),
    RecordInvoice(RecordInvoice),
    Complete(Complete),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: SupplierId,
    pub priority: Priority,
    pub approval_policy: ApprovalPolicy,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_id: LineItemId,
    pub sku: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSubmitted {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    /// `pending_approval` or `approved`, as decided by the approval policy.
    pub status: OrderStatus,
    pub total_amount: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproved {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispatchBlockChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchBlockChanged {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub blocked: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SentToSupplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentToSupplier {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SupplierConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierConfirmed {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Quantity received on one line in a committed receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedQuantity {
    pub line_id: LineItemId,
    pub quantity: i64,
}

/// Event: GoodsReceived.
///
/// Carries only the incoming quantities; cumulative received quantities are
/// rebuilt by replaying every receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub received: Vec<ReceivedQuantity>,
    /// Status after the receipt (`partially_received` or `fully_received`).
    pub status: OrderStatus,
    pub discrepancies_acknowledged: bool,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRecorded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub invoice_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCompleted {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderSubmitted(PurchaseOrderSubmitted),
    PurchaseOrderApproved(PurchaseOrderApproved),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
    DispatchBlockChanged(DispatchBlockChanged),
    SentToSupplier(SentToSupplier),
    SupplierConfirmed(SupplierConfirmed),
    GoodsReceived(GoodsReceived),
    InvoiceRecorded(InvoiceRecorded),
    PurchaseOrderCompleted(PurchaseOrderCompleted),
}

impl PurchaseOrderEvent {
    /// Tenant and order the event belongs to.
    pub fn stream_ref(&self) -> (TenantId, PurchaseOrderId) {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderApproved(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::DispatchBlockChanged(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::SentToSupplier(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::SupplierConfirmed(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::GoodsReceived(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::InvoiceRecorded(e) => (e.tenant_id, e.order_id),
            PurchaseOrderEvent::PurchaseOrderCompleted(e) => (e.tenant_id, e.order_id),
        }
    }

    /// Status the order moves into with this event, if any.
    pub fn resulting_status(&self) -> Option<OrderStatus> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => Some(OrderStatus::Draft),
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => Some(e.status),
            PurchaseOrderEvent::PurchaseOrderApproved(_) => Some(OrderStatus::Approved),
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => Some(OrderStatus::Cancelled),
            PurchaseOrderEvent::SentToSupplier(_) => Some(OrderStatus::SentToSupplier),
            PurchaseOrderEvent::SupplierConfirmed(_) => Some(OrderStatus::SupplierConfirmed),
            PurchaseOrderEvent::GoodsReceived(e) => Some(e.status),
            PurchaseOrderEvent::InvoiceRecorded(_) => Some(OrderStatus::Invoiced),
            PurchaseOrderEvent::PurchaseOrderCompleted(_) => Some(OrderStatus::Completed),
            PurchaseOrderEvent::PurchaseOrderLineAdded(_)
            | PurchaseOrderEvent::DispatchBlockChanged(_) => None,
        }
    }
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderSubmitted(_) => "purchasing.order.submitted",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
            PurchaseOrderEvent::DispatchBlockChanged(_) => "purchasing.order.dispatch_block_changed",
            PurchaseOrderEvent::SentToSupplier(_) => "purchasing.order.sent_to_supplier",
            PurchaseOrderEvent::SupplierConfirmed(_) => "purchasing.order.supplier_confirmed",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::InvoiceRecorded(_) => "purchasing.order.invoice_recorded",
            PurchaseOrderEvent::PurchaseOrderCompleted(_) => "purchasing.order.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
            PurchaseOrderEvent::DispatchBlockChanged(e) => e.occurred_at,
            PurchaseOrderEvent::SentToSupplier(e) => e.occurred_at,
            PurchaseOrderEvent::SupplierConfirmed(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::InvoiceRecorded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCompleted(e) => e.occurred_at,
        }
    }
}

fn line_added(
    tenant_id: TenantId,
    order_id: PurchaseOrderId,
    line_id: LineItemId,
    line: &NewLine,
    occurred_at: DateTime<Utc>,
) -> Result<PurchaseOrderEvent, DomainError> {
    if line.quantity <= 0 {
        return Err(DomainError::validation(format!(
            "{line_id}: quantity must be positive"
        )));
    }

    if line.sku.trim().is_empty() {
        return Err(DomainError::validation(format!(
            "{line_id}: sku must not be empty"
        )));
    }

    Ok(PurchaseOrderEvent::PurchaseOrderLineAdded(
        PurchaseOrderLineAdded {
            tenant_id,
            order_id,
            line_id,
            sku: line.sku.trim().to_string(),
            description: line.description.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            occurred_at,
        },
    ))
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.supplier_id = Some(e.supplier_id);
                self.priority = e.priority;
                self.approval_policy = e.approval_policy;
                self.status = OrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(LineItem::new(
                    e.line_id,
                    e.sku.clone(),
                    e.description.clone(),
                    e.quantity,
                    e.unit_price,
                ));
            }
            PurchaseOrderEvent::PurchaseOrderSubmitted(e) => {
                self.status = e.status;
            }
            PurchaseOrderEvent::PurchaseOrderApproved(e) => {
                self.status = OrderStatus::Approved;
                self.approved_by = Some(e.approved_by);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
            }
            PurchaseOrderEvent::DispatchBlockChanged(e) => {
                self.dispatch_blocked = e.blocked;
            }
            PurchaseOrderEvent::SentToSupplier(_) => {
                self.status = OrderStatus::SentToSupplier;
            }
            PurchaseOrderEvent::SupplierConfirmed(_) => {
                self.status = OrderStatus::SupplierConfirmed;
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for received in &e.received {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.id == received.line_id) {
                        line.quantity_received += received.quantity;
                    }
                }
                self.status = e.status;
            }
            PurchaseOrderEvent::InvoiceRecorded(e) => {
                self.status = OrderStatus::Invoiced;
                self.invoice_reference = Some(e.invoice_reference.clone());
            }
            PurchaseOrderEvent::PurchaseOrderCompleted(_) => {
                self.status = OrderStatus::Completed;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::SubmitOrder(cmd) => self.handle_submit(cmd),
            PurchaseOrderCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
            PurchaseOrderCommand::SetDispatchBlocked(cmd) => self.handle_dispatch_block(cmd),
            PurchaseOrderCommand::SendToSupplier(cmd) => self.handle_send(cmd),
            PurchaseOrderCommand::ConfirmBySupplier(cmd) => self.handle_confirm(cmd),
            PurchaseOrderCommand::RecordReceipt(cmd) => self.handle_receipt(cmd),
            PurchaseOrderCommand::RecordInvoice(cmd) => self.handle_invoice(cmd),
            PurchaseOrderCommand::Complete(cmd) => self.handle_complete(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    fn ensure_transition(&self, to: OrderStatus) -> Result<(), DomainError> {
        if self.lifecycle.can_transition(self.status, to) {
            Ok(())
        } else {
            Err(DomainError::illegal_transition(self.status.as_str(), to.as_str()))
        }
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }

        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("order number must not be empty"));
        }

        let mut events = Vec::with_capacity(cmd.lines.len() + 1);
        events.push(PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                number: cmd.number.trim().to_string(),
                supplier_id: cmd.supplier_id,
                priority: cmd.priority,
                approval_policy: cmd.approval_policy,
                occurred_at: cmd.occurred_at,
            },
        ));

        for (index, line) in cmd.lines.iter().enumerate() {
            events.push(line_added(
                cmd.tenant_id,
                cmd.order_id,
                LineItemId(index as u32 + 1),
                line,
                cmd.occurred_at,
            )?);
        }

        Ok(events)
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(
                "cannot modify purchase order once submitted",
            ));
        }

        let line = NewLine {
            sku: cmd.sku.clone(),
            description: cmd.description.clone(),
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
        };
        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![line_added(
            cmd.tenant_id,
            cmd.order_id,
            LineItemId(next_line_no),
            &line,
            cmd.occurred_at,
        )?])
    }

    fn handle_submit(&self, cmd: &SubmitOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        let total_amount = self.total_amount();
        let target = self.approval_policy.submission_target(total_amount);
        self.ensure_transition(target)?;

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot submit purchase order without lines",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderSubmitted(
            PurchaseOrderSubmitted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                status: target,
                total_amount,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        // draft -> approved is a legal edge, but only submission may take it.
        if self.status == OrderStatus::Draft {
            return Err(DomainError::invariant(
                "draft purchase orders must be submitted before approval",
            ));
        }
        self.ensure_transition(OrderStatus::Approved)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(
            PurchaseOrderApproved {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                approved_by: cmd.approved_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_transition(OrderStatus::Cancelled)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason must not be empty"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                reason: cmd.reason.trim().to_string(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_dispatch_block(
        &self,
        cmd: &SetDispatchBlocked,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot change dispatch block on a {} purchase order",
                self.status
            )));
        }

        // Already in the requested state.
        if self.dispatch_blocked == cmd.blocked {
            return Ok(vec![]);
        }

        Ok(vec![PurchaseOrderEvent::DispatchBlockChanged(
            DispatchBlockChanged {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                blocked: cmd.blocked,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_send(&self, cmd: &SendToSupplier) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_transition(OrderStatus::SentToSupplier)?;

        if self.dispatch_blocked {
            return Err(DomainError::invariant(
                "dispatch to supplier is blocked for this purchase order",
            ));
        }

        let supplier_id = self
            .supplier_id
            .ok_or_else(|| DomainError::invariant("supplier must be set"))?;

        Ok(vec![PurchaseOrderEvent::SentToSupplier(SentToSupplier {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            supplier_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(
        &self,
        cmd: &ConfirmBySupplier,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_transition(OrderStatus::SupplierConfirmed)?;

        Ok(vec![PurchaseOrderEvent::SupplierConfirmed(SupplierConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            supplier_reference: cmd.supplier_reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receipt(
        &self,
        cmd: &RecordReceipt,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if !self.status.accepts_receipts() {
            return Err(DomainError::invariant(format!(
                "cannot receive goods for a {} purchase order",
                self.status
            )));
        }

        let outcome = self.preview_receipt(&cmd.quantities)?;

        // An all-zero session would otherwise move the order with nothing received.
        if cmd.quantities.values().all(|qty| *qty == 0) {
            return Err(DomainError::validation("nothing to receive"));
        }

        let target = match self.completion_decision(&outcome, cmd.acknowledged)? {
            CompletionDecision::RequireAcknowledgement => {
                return Err(DomainError::acknowledgement_required(format!(
                    "{} line item(s) differ from the ordered quantity",
                    outcome.summary.items_with_discrepancies
                )));
            }
            CompletionDecision::Proceed { target_status } => target_status,
        };

        // Further partial receipts keep the order where it is.
        if target != self.status {
            self.ensure_transition(target)?;
        }

        let received = cmd
            .quantities
            .iter()
            .filter(|(_, qty)| **qty > 0)
            .map(|(line_id, quantity)| ReceivedQuantity {
                line_id: *line_id,
                quantity: *quantity,
            })
            .collect();

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            received,
            status: target,
            discrepancies_acknowledged: outcome.summary.items_with_discrepancies > 0,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_invoice(&self, cmd: &RecordInvoice) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_transition(OrderStatus::Invoiced)?;

        if cmd.invoice_reference.trim().is_empty() {
            return Err(DomainError::validation("invoice reference must not be empty"));
        }

        Ok(vec![PurchaseOrderEvent::InvoiceRecorded(InvoiceRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            invoice_reference: cmd.invoice_reference.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &Complete) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_transition(OrderStatus::Completed)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCompleted(
            PurchaseOrderCompleted {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
