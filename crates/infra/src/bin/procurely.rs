//! Starts an in-memory purchasing service from the environment and prints
//! the order lifecycle it enforces.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use procurely_events::{EventEnvelope, InMemoryEventBus};
use procurely_infra::command_dispatcher::CommandDispatcher;
use procurely_infra::config::PurchasingConfig;
use procurely_infra::event_store::InMemoryEventStore;
use procurely_infra::purchase_orders::PurchaseOrderService;
use procurely_purchasing::OrderLifecycle;

fn main() -> anyhow::Result<()> {
    let config = PurchasingConfig::load()?;
    config.init_logging();

    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
    let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
    let service = PurchaseOrderService::new(dispatcher, config.approval_policy());

    info!(
        approval_threshold = service.approval_policy().threshold,
        log_format = %config.log_format,
        "purchasing service ready"
    );

    let transitions: Vec<_> = OrderLifecycle::new()
        .transitions()
        .map(|(from, to)| json!({ "from": from, "to": to }))
        .collect();
    let summary = json!({
        "approval_threshold": service.approval_policy().threshold,
        "transitions": transitions,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
