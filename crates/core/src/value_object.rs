//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are never mutated in place; derived
/// results such as a receipt summary are recomputed rather than updated.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct ReceiptSummary { total_items: usize, fully_received: usize }
///
/// impl ValueObject for ReceiptSummary {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
