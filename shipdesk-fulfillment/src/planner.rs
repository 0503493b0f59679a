use std::collections::BTreeMap;
use uuid::Uuid;
use shipdesk_core::{LineItemSelection, Order};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PlannedLine {
    remaining: i32,
    selected: i32,
}

/// Per-line-item quantities for the shipment being built.
///
/// Invariant: `selected <= remaining` for every tracked line item. Line items
/// with nothing left to ship are never tracked, so they cannot be selected.
#[derive(Debug, Clone)]
pub struct FulfillmentPlanner {
    order_id: Uuid,
    lines: BTreeMap<Uuid, PlannedLine>,
}

impl FulfillmentPlanner {
    /// Open a session seeded with every line item's full remaining quantity
    pub fn open(order: &Order) -> Self {
        let lines = order
            .unfulfilled_items()
            .into_iter()
            .map(|(item, remaining)| (item.id, PlannedLine { remaining, selected: remaining }))
            .collect();
        Self { order_id: order.id, lines }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn set_quantity(&mut self, line_item_id: Uuid, qty: i32) -> Result<(), ValidationError> {
        let line = self
            .lines
            .get_mut(&line_item_id)
            .ok_or(ValidationError::UnknownLineItem(line_item_id))?;

        if qty < 0 {
            return Err(ValidationError::NegativeQuantity(line_item_id));
        }
        if qty > line.remaining {
            return Err(ValidationError::ExceedsRemaining {
                line_item_id,
                requested: qty,
                remaining: line.remaining,
            });
        }

        line.selected = qty;
        Ok(())
    }

    pub fn quantity(&self, line_item_id: &Uuid) -> Option<i32> {
        self.lines.get(line_item_id).map(|line| line.selected)
    }

    pub fn remaining_unfulfilled(&self, line_item_id: &Uuid) -> i32 {
        self.lines.get(line_item_id).map(|line| line.remaining).unwrap_or(0)
    }

    pub fn has_selection(&self) -> bool {
        self.lines.values().any(|line| line.selected > 0)
    }

    /// Non-zero selections, in line item id order
    pub fn selections(&self) -> Vec<LineItemSelection> {
        self.lines
            .iter()
            .filter(|(_, line)| line.selected > 0)
            .map(|(id, line)| LineItemSelection::new(*id, line.selected))
            .collect()
    }

    pub fn clear(&mut self) {
        for line in self.lines.values_mut() {
            line.selected = 0;
        }
    }

    /// Re-derive remaining quantities from a fresher order snapshot.
    /// Existing selections are kept but clamped to the new bound; fully
    /// shipped line items drop out.
    pub fn rebase(&mut self, order: &Order) {
        let fresh: BTreeMap<Uuid, i32> = order
            .unfulfilled_items()
            .into_iter()
            .map(|(item, remaining)| (item.id, remaining))
            .collect();

        self.lines.retain(|id, _| fresh.contains_key(id));
        for (id, remaining) in fresh {
            let line = self.lines.entry(id).or_insert(PlannedLine { remaining, selected: 0 });
            line.remaining = remaining;
            line.selected = line.selected.min(remaining);
        }
    }
}
