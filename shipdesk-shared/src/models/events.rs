use uuid::Uuid;

pub const FULFILLMENT_CREATED: &str = "fulfillment.created";
pub const FULFILLMENT_CANCELED: &str = "fulfillment.canceled";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct FulfilledQuantity {
    pub line_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct FulfillmentCreatedEvent {
    pub fulfillment_id: Uuid,
    pub order_id: Uuid,
    pub items: Vec<FulfilledQuantity>,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct FulfillmentCanceledEvent {
    pub fulfillment_id: Uuid,
    pub order_id: Uuid,
    pub canceled_at: i64,
}

/// Envelope published to the audit sink
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FulfillmentEvent {
    Created(FulfillmentCreatedEvent),
    Canceled(FulfillmentCanceledEvent),
}

impl FulfillmentEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            FulfillmentEvent::Created(_) => FULFILLMENT_CREATED,
            FulfillmentEvent::Canceled(_) => FULFILLMENT_CANCELED,
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            FulfillmentEvent::Created(e) => e.order_id,
            FulfillmentEvent::Canceled(e) => e.order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_is_tagged() {
        let event = FulfillmentEvent::Canceled(FulfillmentCanceledEvent {
            fulfillment_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            canceled_at: 1_700_000_000,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "canceled");
        assert_eq!(json["payload"]["canceled_at"], 1_700_000_000);
        assert_eq!(event.topic(), FULFILLMENT_CANCELED);
    }
}
