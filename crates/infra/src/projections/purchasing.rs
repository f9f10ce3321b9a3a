use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use procurely_core::{AggregateId, TenantId};
use procurely_events::EventEnvelope;
use procurely_purchasing::{
    AGGREGATE_TYPE, ApprovalPolicy, LineItem, OrderLifecycle, OrderStatus, Priority,
    PurchaseOrderEvent, PurchaseOrderId, ReceiptLine, ReceiptSummary, SupplierId,
};

use crate::read_model::TenantStore;

/// Display model of a purchase order.
///
/// Only source fields are kept; totals, approval and receipt progress are
/// recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderReadModel {
    pub order_id: PurchaseOrderId,
    pub number: String,
    pub supplier_id: SupplierId,
    pub priority: Priority,
    pub approval_policy: ApprovalPolicy,
    pub status: OrderStatus,
    pub lines: Vec<LineItem>,
    pub dispatch_blocked: bool,
    pub invoice_reference: Option<String>,
    /// Whether the most recent receipt was committed over acknowledged discrepancies.
    pub last_receipt_had_discrepancies: bool,
}

impl PurchaseOrderReadModel {
    pub fn total_amount(&self) -> u64 {
        self.lines
            .iter()
            .fold(0u64, |acc, line| acc.saturating_add(line.line_total()))
    }

    pub fn approval_required(&self) -> bool {
        self.approval_policy.requires_approval(self.total_amount())
    }

    /// Receipt progress of the committed quantities.
    pub fn receipt_progress(&self) -> ReceiptSummary {
        let lines: Vec<ReceiptLine> = self
            .lines
            .iter()
            .map(|line| ReceiptLine {
                line_id: line.id,
                quantity_ordered: line.quantity_ordered,
                previously_received: line.quantity_received,
                quantity_to_receive: 0,
            })
            .collect();
        ReceiptSummary::from_lines(&lines)
    }

    pub fn next_valid_states(&self) -> &'static [OrderStatus] {
        OrderLifecycle::new().next_valid_states(self.status)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum PurchaseOrderProjectionError {
    #[error("failed to deserialize purchase order event: {0}")]
    Deserialize(String),
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Builds [`PurchaseOrderReadModel`]s from committed purchase order events.
///
/// Idempotent under at-least-once delivery: envelopes at or below the
/// per-stream cursor are ignored.
#[derive(Debug)]
pub struct PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> PurchaseOrdersProjection<S>
where
    S: TenantStore<PurchaseOrderId, PurchaseOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey { tenant_id, aggregate_id })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { tenant_id, aggregate_id }, seq);
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.tenant_id != tenant_id);
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &PurchaseOrderId) -> Option<PurchaseOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<PurchaseOrderReadModel> {
        self.store.list(tenant_id)
    }

    /// Orders in `status` for a tenant, sorted by order number.
    pub fn list_by_status(&self, tenant_id: TenantId, status: OrderStatus) -> Vec<PurchaseOrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|o| o.status == status)
            .collect();
        orders.sort_by(|a, b| a.number.cmp(&b.number));
        orders
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), PurchaseOrderProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(tenant_id, aggregate_id);
        if seq == 0 {
            return Err(PurchaseOrderProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(PurchaseOrderProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: PurchaseOrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| PurchaseOrderProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, order_id) = ev.stream_ref();
        if event_tenant != tenant_id {
            return Err(PurchaseOrderProjectionError::TenantIsolation(
                "event tenant_id does not match envelope tenant_id".to_string(),
            ));
        }
        if order_id.0 != aggregate_id {
            return Err(PurchaseOrderProjectionError::TenantIsolation(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        if let PurchaseOrderEvent::PurchaseOrderCreated(e) = &ev {
            self.store.upsert(
                tenant_id,
                e.order_id,
                PurchaseOrderReadModel {
                    order_id: e.order_id,
                    number: e.number.clone(),
                    supplier_id: e.supplier_id,
                    priority: e.priority,
                    approval_policy: e.approval_policy,
                    status: OrderStatus::Draft,
                    lines: vec![],
                    dispatch_blocked: false,
                    invoice_reference: None,
                    last_receipt_had_discrepancies: false,
                },
            );
            self.update_cursor(tenant_id, aggregate_id, seq);
            return Ok(());
        }

        let Some(mut rm) = self.store.get(tenant_id, &order_id) else {
            // Joined mid-stream; a rebuild will pick this order up.
            debug!(%tenant_id, %order_id, seq, "skipping event for unknown purchase order");
            self.update_cursor(tenant_id, aggregate_id, seq);
            return Ok(());
        };

        match &ev {
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                rm.lines.push(LineItem::new(
                    e.line_id,
                    e.sku.clone(),
                    e.description.clone(),
                    e.quantity,
                    e.unit_price,
                ));
            }
            PurchaseOrderEvent::DispatchBlockChanged(e) => {
                rm.dispatch_blocked = e.blocked;
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for received in &e.received {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.id == received.line_id) {
                        line.quantity_received += received.quantity;
                    }
                }
                rm.last_receipt_had_discrepancies = e.discrepancies_acknowledged;
            }
            PurchaseOrderEvent::InvoiceRecorded(e) => {
                rm.invoice_reference = Some(e.invoice_reference.clone());
            }
            _ => {}
        }

        if let Some(status) = ev.resulting_status() {
            rm.status = status;
        }

        self.store.upsert(tenant_id, order_id, rm);
        self.update_cursor(tenant_id, aggregate_id, seq);
        Ok(())
    }

    /// Drop the tenants' read models and replay `envelopes` in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), PurchaseOrderProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        let mut tenants = envs.iter().map(|e| e.tenant_id()).collect::<Vec<_>>();
        tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
        tenants.dedup();
        for t in tenants {
            self.store.clear_tenant(t);
            self.clear_cursors(t);
        }

        envs.sort_by_key(|e| {
            (
                *e.tenant_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
