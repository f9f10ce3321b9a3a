//! Purchasing domain module (purchase orders, event-sourced).
//!
//! Business rules only: the status lifecycle, the approval rule, goods-receipt
//! reconciliation and the `PurchaseOrder` aggregate that ties them together.
//! No IO, no HTTP, no storage.

pub mod approval;
pub mod lifecycle;
pub mod line;
pub mod order;
pub mod receipt;

pub use approval::{ApprovalPolicy, DEFAULT_APPROVAL_THRESHOLD};
pub use lifecycle::{OrderLifecycle, OrderStatus};
pub use line::{LineItem, LineItemId};
pub use order::{
    AGGREGATE_TYPE, AddLine, Approve, Cancel, Complete, ConfirmBySupplier, CreatePurchaseOrder,
    DispatchBlockChanged, GoodsReceived, InvoiceRecorded, NewLine, Priority, PurchaseOrder,
    PurchaseOrderApproved, PurchaseOrderCancelled, PurchaseOrderCommand, PurchaseOrderCompleted,
    PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderLineAdded,
    PurchaseOrderSubmitted, ReceivedQuantity, RecordInvoice, RecordReceipt, SendToSupplier,
    SentToSupplier, SetDispatchBlocked, SubmitOrder, SupplierConfirmed, SupplierId,
};
pub use receipt::{
    CompletionDecision, IncomingQuantities, ReceiptLine, ReceiptOutcome, ReceiptReconciler,
    ReceiptSummary,
};
