use serde::{Deserialize, Serialize};

use procurely_core::Entity;

/// Line item identifier, stable for the lifetime of the order (1-based line number).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItemId(pub u32);

impl core::fmt::Display for LineItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "line {}", self.0)
    }
}

/// Purchase order line item.
///
/// `quantity_ordered` is fixed when the line is added; `quantity_received`
/// only ever grows through recorded receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub sku: String,
    pub description: String,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl LineItem {
    pub fn new(
        id: LineItemId,
        sku: impl Into<String>,
        description: impl Into<String>,
        quantity_ordered: i64,
        unit_price: u64,
    ) -> Self {
        Self {
            id,
            sku: sku.into(),
            description: description.into(),
            quantity_ordered,
            quantity_received: 0,
            unit_price,
        }
    }

    /// Ordered value of the line in minor units.
    pub fn line_total(&self) -> u64 {
        (self.quantity_ordered.max(0) as u64).saturating_mul(self.unit_price)
    }

    /// Quantity still expected from the supplier (never negative).
    pub fn outstanding(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
