use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::error::QuantityShortfall;
use crate::shipping::LineItemSelection;

/// An order as seen by fulfillment. Line items never change after creation;
/// only the fulfillment collection grows or gets canceled entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub display_number: String,
    pub line_items: Vec<LineItem>,
    pub fulfillments: Vec<Fulfillment>,
    pub shipping_address: Option<Address>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(display_number: impl Into<String>, line_items: Vec<LineItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_number: display_number.into(),
            line_items,
            fulfillments: Vec::new(),
            shipping_address: None,
            created_at: Utc::now(),
        }
    }

    pub fn line_item(&self, line_item_id: &Uuid) -> Option<&LineItem> {
        self.line_items.iter().find(|item| item.id == *line_item_id)
    }

    /// Units of a line item consumed by non-canceled fulfillments
    pub fn fulfilled_quantity(&self, line_item_id: &Uuid) -> i32 {
        self.active_fulfillments()
            .flat_map(|f| f.items.iter())
            .filter(|item| item.line_item_id == *line_item_id)
            .map(|item| item.quantity)
            .sum()
    }

    /// Ordered quantity minus what active fulfillments already cover.
    /// Unknown line items have nothing remaining.
    pub fn remaining_unfulfilled(&self, line_item_id: &Uuid) -> i32 {
        match self.line_item(line_item_id) {
            Some(item) => (item.quantity - self.fulfilled_quantity(line_item_id)).max(0),
            None => 0,
        }
    }

    /// Line items that still have units left to ship, with the remaining count
    pub fn unfulfilled_items(&self) -> Vec<(&LineItem, i32)> {
        self.line_items
            .iter()
            .map(|item| (item, self.remaining_unfulfilled(&item.id)))
            .filter(|(_, remaining)| *remaining > 0)
            .collect()
    }

    pub fn has_unfulfilled(&self) -> bool {
        !self.unfulfilled_items().is_empty()
    }

    pub fn active_fulfillments(&self) -> impl Iterator<Item = &Fulfillment> {
        self.fulfillments.iter().filter(|f| f.is_active())
    }

    /// Split fulfillments into (active, canceled) for the history view
    pub fn partition_fulfillments(&self) -> (Vec<&Fulfillment>, Vec<&Fulfillment>) {
        self.fulfillments.iter().partition(|f| f.is_active())
    }

    /// Check requested quantities against what is live on this snapshot.
    /// Quantities for the same line item are summed before comparison.
    pub fn check_selections(&self, selections: &[LineItemSelection]) -> Result<(), Vec<QuantityShortfall>> {
        // Summed in i64 so duplicate selections cannot wrap past the check
        let mut requested: Vec<(Uuid, i64)> = Vec::new();
        for selection in selections {
            let quantity = i64::from(selection.quantity);
            match requested.iter_mut().find(|(id, _)| *id == selection.line_item_id) {
                Some((_, qty)) => *qty += quantity,
                None => requested.push((selection.line_item_id, quantity)),
            }
        }

        let shortfalls: Vec<QuantityShortfall> = requested
            .into_iter()
            .filter_map(|(line_item_id, qty)| {
                let remaining = self.remaining_unfulfilled(&line_item_id);
                (qty > i64::from(remaining)).then(|| QuantityShortfall {
                    line_item_id,
                    requested: i32::try_from(qty).unwrap_or(i32::MAX),
                    remaining,
                })
            })
            .collect();

        if shortfalls.is_empty() {
            Ok(())
        } else {
            Err(shortfalls)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub title: String,
    pub sku: Option<String>,
    pub quantity: i32,
}

impl LineItem {
    pub fn new(order_id: Uuid, title: impl Into<String>, sku: Option<String>, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            title: title.into(),
            sku,
            quantity,
        }
    }
}

/// One shipment-creation event. Never deleted, only canceled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fulfillment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub items: Vec<FulfillmentItem>,
    pub labels: Vec<ShippingLabel>,
    pub created_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Fulfillment {
    pub fn new(order_id: Uuid, selections: &[LineItemSelection], labels: Vec<ShippingLabel>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            order_id,
            items: selections
                .iter()
                .filter(|s| s.quantity > 0)
                .map(|s| FulfillmentItem::new(id, s.line_item_id, s.quantity))
                .collect(),
            labels,
            created_at: Utc::now(),
            canceled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.canceled_at.is_none()
    }

    pub fn total_quantity(&self) -> i32 {
        self.items.iter().map(|item| item.quantity).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FulfillmentItem {
    pub id: Uuid,
    pub fulfillment_id: Uuid,
    pub line_item_id: Uuid,
    pub quantity: i32,
}

impl FulfillmentItem {
    pub fn new(fulfillment_id: Uuid, line_item_id: Uuid, quantity: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            fulfillment_id,
            line_item_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelStatus {
    Purchased,
    /// Operator typed carrier and tracking number by hand
    Manual,
    Voided,
}

impl LabelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelStatus::Purchased => "PURCHASED",
            LabelStatus::Manual => "MANUAL",
            LabelStatus::Voided => "VOIDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PURCHASED" => Some(LabelStatus::Purchased),
            "MANUAL" => Some(LabelStatus::Manual),
            "VOIDED" => Some(LabelStatus::Voided),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingLabel {
    pub id: Uuid,
    pub carrier: String,
    pub service: Option<String>,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub label_url: Option<String>,
    pub status: LabelStatus,
    /// Provider-side reference used to void the label
    pub provider_reference: Option<String>,
    pub metadata: serde_json::Value,
}

impl ShippingLabel {
    pub fn purchased(carrier: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            carrier: carrier.into(),
            service: None,
            tracking_number: tracking_number.into(),
            tracking_url: None,
            label_url: None,
            status: LabelStatus::Purchased,
            provider_reference: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn manual(carrier: impl Into<String>, tracking_number: impl Into<String>, tracking_url: Option<String>) -> Self {
        Self {
            tracking_url,
            status: LabelStatus::Manual,
            ..Self::purchased(carrier, tracking_number)
        }
    }

    /// Reference handed to `cancel_label`; falls back to the tracking number
    pub fn void_reference(&self) -> &str {
        self.provider_reference.as_deref().unwrap_or(&self.tracking_number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatedAddress {
    pub address: Address,
    pub is_valid: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingEvent {
    pub occurred_at: DateTime<Utc>,
    pub description: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingStatus {
    pub tracking_number: String,
    pub status: String,
    #[serde(default)]
    pub events: Vec<TrackingEvent>,
}
