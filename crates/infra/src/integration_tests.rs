//! Integration tests for the full purchase order pipeline.
//!
//! Tests: Service → CommandDispatcher → EventStore → EventBus → Projection → ReadModel
//!
//! Verifies:
//! - An order walks the whole lifecycle and the read model follows it
//! - Receipts with discrepancies are gated on acknowledgement
//! - A stale acknowledgement is rejected by optimistic concurrency
//! - Illegal transitions surface as `DispatchError::IllegalTransition`
//! - Tenant isolation is preserved

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use procurely_core::{AggregateId, TenantId, UserId};
    use procurely_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use procurely_purchasing::{
        AGGREGATE_TYPE, ApprovalPolicy, LineItemId, OrderStatus, Priority, PurchaseOrderId, SupplierId,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::config::PurchasingConfig;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projections::purchasing::{PurchaseOrderReadModel, PurchaseOrdersProjection};
    use crate::purchase_orders::{
        NewLine, NewPurchaseOrder, PurchaseOrderService, ReceiveGoods, ReceivingResult,
    };
    use crate::read_model::InMemoryTenantStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;
    type Service = PurchaseOrderService<InMemoryEventStore, Bus>;
    type Projection =
        PurchaseOrdersProjection<Arc<InMemoryTenantStore<PurchaseOrderId, PurchaseOrderReadModel>>>;

    fn setup_with(policy: ApprovalPolicy) -> (Service, Arc<Projection>) {
        let store = InMemoryEventStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store, bus.clone());
        let projection = Arc::new(PurchaseOrdersProjection::new(Arc::new(InMemoryTenantStore::new())));

        // Subscribe to the bus BEFORE any events are published
        let projection_clone = projection.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus.subscribe();
            let _ = ready_tx.send(());
            while let Ok(env) = sub.recv() {
                if let Err(e) = projection_clone.apply_envelope(&env) {
                    eprintln!("Failed to apply envelope: {e:?}");
                }
            }
        });
        let _ = ready_rx.recv_timeout(Duration::from_secs(1));

        (PurchaseOrderService::new(dispatcher, policy), projection)
    }

    fn setup() -> (Service, Arc<Projection>) {
        let config = PurchasingConfig::from_lookup(|_| None).unwrap();
        setup_with(config.approval_policy())
    }

    /// Poll the read model until `check` holds; the subscriber runs on its own thread.
    fn wait_for(
        projection: &Projection,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        check: impl Fn(&PurchaseOrderReadModel) -> bool,
    ) -> PurchaseOrderReadModel {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(rm) = projection.get(tenant_id, &order_id) {
                if check(&rm) {
                    return rm;
                }
            }
            assert!(Instant::now() < deadline, "read model did not catch up");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn new_order(lines: &[(i64, u64)]) -> NewPurchaseOrder {
        NewPurchaseOrder {
            number: "PO-2024-0042".to_string(),
            supplier_id: SupplierId::new(AggregateId::new()),
            priority: Priority::Normal,
            lines: lines
                .iter()
                .enumerate()
                .map(|(idx, (quantity, unit_price))| NewLine {
                    sku: format!("PART-{idx}"),
                    description: format!("part {idx}"),
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect(),
        }
    }

    fn receipt(pairs: &[(u32, i64)], acknowledged_at: Option<u64>) -> ReceiveGoods {
        ReceiveGoods {
            quantities: pairs.iter().map(|(id, qty)| (LineItemId(*id), *qty)).collect(),
            received_by: UserId::new(),
            acknowledged_at,
        }
    }

    fn confirmed_order(service: &Service, tenant_id: TenantId, lines: &[(i64, u64)]) -> PurchaseOrderId {
        let order_id = service.create_order(tenant_id, new_order(lines)).unwrap();
        if service.submit(tenant_id, order_id).unwrap() == OrderStatus::PendingApproval {
            service.approve(tenant_id, order_id, UserId::new()).unwrap();
        }
        service.send_to_supplier(tenant_id, order_id).unwrap();
        service.confirm_by_supplier(tenant_id, order_id, Some("SO-991".to_string())).unwrap();
        order_id
    }

    #[test]
    fn order_walks_full_lifecycle_and_read_model_follows() {
        let (service, projection) = setup();
        let tenant_id = TenantId::new();

        // 25 x 10_000 = 250_000 minor units, above the default threshold.
        let order_id = service.create_order(tenant_id, new_order(&[(20, 10_000), (5, 10_000)])).unwrap();
        let rm = wait_for(&projection, tenant_id, order_id, |rm| rm.lines.len() == 2);
        assert_eq!(rm.status, OrderStatus::Draft);
        assert_eq!(rm.total_amount(), 250_000);
        assert!(rm.approval_required());

        assert_eq!(service.submit(tenant_id, order_id).unwrap(), OrderStatus::PendingApproval);
        assert_eq!(service.approve(tenant_id, order_id, UserId::new()).unwrap(), OrderStatus::Approved);
        assert_eq!(service.send_to_supplier(tenant_id, order_id).unwrap(), OrderStatus::SentToSupplier);
        assert_eq!(
            service.confirm_by_supplier(tenant_id, order_id, None).unwrap(),
            OrderStatus::SupplierConfirmed
        );

        let first = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 20)], None))
            .unwrap();
        let ReceivingResult::AwaitingAcknowledgement { preview } = first else {
            panic!("line 2 is missing, expected acknowledgement gate");
        };
        assert_eq!(preview.outcome.summary.fully_received, 1);
        assert_eq!(preview.outcome.summary.items_with_discrepancies, 1);

        let second = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 20)], Some(preview.version)))
            .unwrap();
        assert!(matches!(
            second,
            ReceivingResult::Committed { status: OrderStatus::PartiallyReceived, .. }
        ));

        let rest = service
            .receive_goods(tenant_id, order_id, receipt(&[(2, 5)], None))
            .unwrap();
        assert!(matches!(
            rest,
            ReceivingResult::Committed { status: OrderStatus::FullyReceived, .. }
        ));
        assert!(service.load_order(tenant_id, order_id).unwrap().invoice_required());

        assert_eq!(service.record_invoice(tenant_id, order_id, "INV-77").unwrap(), OrderStatus::Invoiced);
        assert_eq!(service.complete(tenant_id, order_id).unwrap(), OrderStatus::Completed);

        let rm = wait_for(&projection, tenant_id, order_id, |rm| rm.status == OrderStatus::Completed);
        assert_eq!(rm.invoice_reference.as_deref(), Some("INV-77"));
        assert!(rm.receipt_progress().is_complete_receipt());
        assert!(rm.next_valid_states().is_empty());
    }

    #[test]
    fn discrepancy_without_acknowledgement_writes_nothing() {
        let (service, projection) = setup();
        let tenant_id = TenantId::new();
        let order_id = confirmed_order(&service, tenant_id, &[(10, 500)]);
        let before = service.load_order(tenant_id, order_id).unwrap();

        let result = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 12)], None))
            .unwrap();
        let ReceivingResult::AwaitingAcknowledgement { preview } = result else {
            panic!("over-receipt must be acknowledged");
        };
        assert!(preview.outcome.lines[0].is_over_received());
        assert_eq!(preview.outcome.lines[0].discrepancy(), 2);

        let after = service.load_order(tenant_id, order_id).unwrap();
        assert_eq!(after, before);

        let rm = wait_for(&projection, tenant_id, order_id, |rm| {
            rm.status == OrderStatus::SupplierConfirmed
        });
        assert_eq!(rm.lines[0].quantity_received, 0);
    }

    #[test]
    fn stale_acknowledgement_is_rejected() {
        let (service, projection) = setup();
        let tenant_id = TenantId::new();
        let order_id = confirmed_order(&service, tenant_id, &[(10, 500), (4, 500)]);

        // Two receivers preview the same order.
        let ReceivingResult::AwaitingAcknowledgement { preview: seen_by_a } = service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 6)], None))
            .unwrap()
        else {
            panic!("expected acknowledgement gate");
        };
        let ReceivingResult::AwaitingAcknowledgement { preview: seen_by_b } = service
            .receive_goods(tenant_id, order_id, receipt(&[(2, 4)], None))
            .unwrap()
        else {
            panic!("expected acknowledgement gate");
        };
        assert_eq!(seen_by_a.version, seen_by_b.version);

        service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 6)], Some(seen_by_a.version)))
            .unwrap();

        let err = service
            .receive_goods(tenant_id, order_id, receipt(&[(2, 4)], Some(seen_by_b.version)))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));

        let rm = wait_for(&projection, tenant_id, order_id, |rm| {
            rm.status == OrderStatus::PartiallyReceived
        });
        assert_eq!(rm.lines[0].quantity_received, 6);
        assert_eq!(rm.lines[1].quantity_received, 0);
    }

    #[test]
    fn illegal_transitions_are_reported_with_both_states() {
        let (service, _projection) = setup();
        let tenant_id = TenantId::new();
        let order_id = service.create_order(tenant_id, new_order(&[(1, 300_000)])).unwrap();

        let err = service.complete(tenant_id, order_id).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::IllegalTransition { ref from, ref to } if from == "draft" && to == "completed"
        ));

        assert_eq!(service.submit(tenant_id, order_id).unwrap(), OrderStatus::PendingApproval);
        assert_eq!(
            service.cancel(tenant_id, order_id, "supplier out of stock").unwrap(),
            OrderStatus::Cancelled
        );
        let err = service.send_to_supplier(tenant_id, order_id).unwrap_err();
        assert!(matches!(err, DispatchError::IllegalTransition { .. }));
    }

    #[test]
    fn blocked_dispatch_holds_the_order() {
        let (service, projection) = setup();
        let tenant_id = TenantId::new();
        let order_id = service.create_order(tenant_id, new_order(&[(1, 100)])).unwrap();
        service.submit(tenant_id, order_id).unwrap();

        service.set_dispatch_blocked(tenant_id, order_id, true).unwrap();
        assert!(service.send_to_supplier(tenant_id, order_id).is_err());
        wait_for(&projection, tenant_id, order_id, |rm| rm.dispatch_blocked);

        service.set_dispatch_blocked(tenant_id, order_id, false).unwrap();
        assert_eq!(service.send_to_supplier(tenant_id, order_id).unwrap(), OrderStatus::SentToSupplier);
    }

    #[test]
    fn configured_threshold_changes_submission_target() {
        let (service, _projection) = setup_with(ApprovalPolicy::new(1_000));
        let tenant_id = TenantId::new();

        let small = service.create_order(tenant_id, new_order(&[(10, 100)])).unwrap();
        assert_eq!(service.submit(tenant_id, small).unwrap(), OrderStatus::Approved);

        let large = service.create_order(tenant_id, new_order(&[(10, 101)])).unwrap();
        assert_eq!(service.submit(tenant_id, large).unwrap(), OrderStatus::PendingApproval);
    }

    #[test]
    fn tenant_isolation_preserved() {
        let (service, projection) = setup();
        let tenant1 = TenantId::new();
        let tenant2 = TenantId::new();
        let order_id = service.create_order(tenant1, new_order(&[(3, 100)])).unwrap();
        wait_for(&projection, tenant1, order_id, |rm| rm.lines.len() == 1);

        assert!(matches!(
            service.load_order(tenant2, order_id).unwrap_err(),
            DispatchError::NotFound
        ));
        assert!(service.submit(tenant2, order_id).is_err());
        assert!(projection.get(tenant2, &order_id).is_none());
        assert!(projection.list(tenant2).is_empty());
    }

    #[test]
    fn read_model_rebuilds_from_the_event_store() {
        let (service, projection) = setup();
        let tenant_id = TenantId::new();
        let order_id = confirmed_order(&service, tenant_id, &[(4, 100)]);
        let draft_id = service.create_order(tenant_id, new_order(&[(1, 100)])).unwrap();
        service
            .receive_goods(tenant_id, order_id, receipt(&[(1, 4)], None))
            .unwrap();
        let live = wait_for(&projection, tenant_id, order_id, |rm| {
            rm.status == OrderStatus::FullyReceived
        });

        let history = service
            .dispatcher()
            .store()
            .load_tenant(tenant_id, AGGREGATE_TYPE)
            .unwrap();
        let rebuilt = PurchaseOrdersProjection::new(
            InMemoryTenantStore::<PurchaseOrderId, PurchaseOrderReadModel>::new(),
        );
        rebuilt
            .rebuild_from_scratch(history.iter().map(|e| e.to_envelope()))
            .unwrap();

        assert_eq!(rebuilt.get(tenant_id, &order_id), Some(live));
        assert_eq!(
            rebuilt.list_by_status(tenant_id, OrderStatus::Draft)[0].order_id,
            draft_id
        );
    }
}
