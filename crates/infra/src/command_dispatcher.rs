//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Append to store with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! Step 4 is what serialises writers on a single purchase order: if another
//! receipt or transition committed after step 1, the append fails with
//! `DispatchError::Concurrency` and nothing is written or published.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use procurely_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, TenantId};
use procurely_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Cross-tenant or cross-aggregate stream mixing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    /// Input rejected before any decision was made.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Requested status change is not in the lifecycle table.
    #[error("illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },
    /// Receipt discrepancies must be acknowledged first.
    #[error("acknowledgement required: {0}")]
    AcknowledgementRequired(String),
    /// Domain invariant failure.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Domain authorization failure.
    #[error("unauthorized")]
    Unauthorized,
    /// Domain-level not found.
    #[error("not found")]
    NotFound,
    /// Historical payloads did not deserialize into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::IllegalTransition { from, to } => {
                DispatchError::IllegalTransition { from, to }
            }
            DomainError::AcknowledgementRequired(msg) => DispatchError::AcknowledgementRequired(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store `S` and bus `B` so tests run against
/// `InMemoryEventStore` / `InMemoryEventBus` and real backends can be swapped in.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without handling anything.
    ///
    /// The aggregate's `version()` is the stream version to pass back to
    /// [`dispatch_expecting`](Self::dispatch_expecting).
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command against the latest committed state.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: procurely_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatch_expecting(
            tenant_id,
            aggregate_id,
            aggregate_type,
            command,
            ExpectedVersion::Any,
            make_aggregate,
        )
    }

    /// Dispatch a command only if the stream is still at `expected`.
    ///
    /// Used when a decision was shown to a person (e.g. a receipt's
    /// discrepancy list) and must commit against the exact state they saw.
    pub fn dispatch_expecting<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        expected: ExpectedVersion,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: procurely_events::Event + Serialize + DeserializeOwned,
    {
        // 1-2) Load + rehydrate
        let aggregate = self.load(tenant_id, aggregate_id, make_aggregate)?;
        let current = aggregate.version();
        if !expected.matches(current) {
            warn!(%tenant_id, %aggregate_id, ?expected, current, "stale aggregate version");
            return Err(DispatchError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(current))
            .inspect_err(|e| warn!(%tenant_id, %aggregate_id, error = %e, "append rejected"))?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            debug!(
                %tenant_id,
                %aggregate_id,
                event_type = %stored.event_type,
                sequence_number = stored.sequence_number,
                "publishing committed event"
            );
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce tenant isolation even if a buggy backend returns cross-tenant data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = stored
            .decode()
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_category() {
        assert!(matches!(
            DispatchError::from(DomainError::illegal_transition("invoiced", "draft")),
            DispatchError::IllegalTransition { ref from, ref to } if from == "invoiced" && to == "draft"
        ));
        assert!(matches!(
            DispatchError::from(DomainError::acknowledgement_required("2 line item(s)")),
            DispatchError::AcknowledgementRequired(_)
        ));
        assert!(matches!(
            DispatchError::from(DomainError::conflict("stale")),
            DispatchError::Concurrency(_)
        ));
        assert!(matches!(
            DispatchError::from(DomainError::invalid_id("bad")),
            DispatchError::Validation(_)
        ));
    }

    #[test]
    fn store_concurrency_maps_to_dispatch_concurrency() {
        let err = DispatchError::from(EventStoreError::Concurrency("expected Exact(1), found 2".into()));
        assert!(matches!(err, DispatchError::Concurrency(_)));

        let err = DispatchError::from(EventStoreError::Poisoned);
        assert!(matches!(err, DispatchError::Store(_)));
    }

    #[test]
    fn non_monotonic_streams_are_rejected() {
        let tenant_id = TenantId::new();
        let aggregate_id = AggregateId::new();
        let event = |seq| StoredEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: "purchasing.order".to_string(),
            sequence_number: seq,
            event_type: "purchasing.order.created".to_string(),
            event_version: 1,
            occurred_at: chrono::Utc::now(),
            payload: JsonValue::Null,
        };

        assert!(validate_loaded_stream(tenant_id, aggregate_id, &[event(1), event(2)]).is_ok());
        assert!(validate_loaded_stream(tenant_id, aggregate_id, &[event(2), event(2)]).is_err());
        assert!(validate_loaded_stream(TenantId::new(), aggregate_id, &[event(1)]).is_err());
    }
}
