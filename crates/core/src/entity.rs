//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Purchase-order line items are entities: their received quantity changes
/// across receipts while their identifier stays stable.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
