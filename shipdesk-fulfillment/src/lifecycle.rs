use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use shipdesk_core::repository::OrderRepository;
use shipdesk_core::{Fulfillment, Order, StoreError};

use crate::error::{FulfillmentError, FulfillmentResult};

#[derive(Debug, Clone, Serialize)]
pub struct CancelFailure {
    pub fulfillment_id: Uuid,
    pub error: String,
}

/// Per-fulfillment results of a bulk cancel. A partial failure is reported,
/// never rolled back.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancelAllOutcome {
    pub succeeded: Vec<Fulfillment>,
    pub failed: Vec<CancelFailure>,
}

impl CancelAllOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItemProgress {
    pub line_item_id: Uuid,
    pub title: String,
    pub ordered: i32,
    pub fulfilled: i32,
    pub remaining: i32,
}

/// Active and canceled fulfillments of an order, listed separately
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentHistory {
    pub order_id: Uuid,
    pub active: Vec<Fulfillment>,
    pub canceled: Vec<Fulfillment>,
    pub line_items: Vec<LineItemProgress>,
}

impl FulfillmentHistory {
    pub fn from_order(order: &Order) -> Self {
        let (active, canceled) = order.partition_fulfillments();
        Self {
            order_id: order.id,
            active: active.into_iter().cloned().collect(),
            canceled: canceled.into_iter().cloned().collect(),
            line_items: order
                .line_items
                .iter()
                .map(|item| LineItemProgress {
                    line_item_id: item.id,
                    title: item.title.clone(),
                    ordered: item.quantity,
                    fulfilled: order.fulfilled_quantity(&item.id),
                    remaining: order.remaining_unfulfilled(&item.id),
                })
                .collect(),
        }
    }
}

/// Cancels fulfillments. Cancellation only marks the record: labels are not
/// voided with the carrier and no inventory is restocked here.
///
/// Remaining quantities are derived from non-canceled fulfillments only, so
/// a canceled fulfillment's units count as unfulfilled again and can be
/// shipped in a later fulfillment. Callers that need cancellation to leave
/// the unfulfilled pool untouched must not rely on `remaining_unfulfilled`.
pub struct FulfillmentLifecycle {
    orders: Arc<dyn OrderRepository>,
}

impl FulfillmentLifecycle {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    pub async fn cancel_one(&self, fulfillment_id: Uuid) -> FulfillmentResult<Fulfillment> {
        match self.orders.cancel_fulfillment(fulfillment_id, Utc::now()).await {
            Ok(fulfillment) => {
                tracing::info!("Canceled fulfillment {} on order {}", fulfillment.id, fulfillment.order_id);
                Ok(fulfillment)
            }
            Err(StoreError::AlreadyCanceled(canceled_at)) => {
                Err(FulfillmentError::AlreadyCanceled { id: fulfillment_id, canceled_at })
            }
            Err(err) => Err(FulfillmentError::from_store(err)),
        }
    }

    /// Cancel every fulfillment that is active at call time, one by one
    pub async fn cancel_all(&self, order_id: Uuid) -> FulfillmentResult<CancelAllOutcome> {
        let order = self.load_order(order_id).await?;
        let targets: Vec<Uuid> = order.active_fulfillments().map(|f| f.id).collect();

        let mut outcome = CancelAllOutcome::default();
        for fulfillment_id in targets {
            match self.cancel_one(fulfillment_id).await {
                Ok(fulfillment) => outcome.succeeded.push(fulfillment),
                Err(err) => {
                    tracing::warn!("Could not cancel fulfillment {}: {}", fulfillment_id, err);
                    outcome.failed.push(CancelFailure { fulfillment_id, error: err.to_string() });
                }
            }
        }

        tracing::info!(
            "Bulk cancel on order {}: {} canceled, {} failed",
            order.display_number,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    pub async fn history(&self, order_id: Uuid) -> FulfillmentResult<FulfillmentHistory> {
        let order = self.load_order(order_id).await?;
        Ok(FulfillmentHistory::from_order(&order))
    }

    async fn load_order(&self, order_id: Uuid) -> FulfillmentResult<Order> {
        self.orders
            .get_order(order_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, ScriptedCarrier};
    use shipdesk_core::LineItemSelection;

    async fn ship(fx: &crate::testing::Fixture, qty: i32) -> Fulfillment {
        let fulfillment = Fulfillment::new(fx.order_id, &[LineItemSelection::new(fx.line_item_id, qty)], vec![]);
        fx.store.commit_fulfillment(&fulfillment).await.unwrap()
    }

    #[tokio::test]
    async fn test_second_cancel_reports_original_timestamp() {
        let fx = fixture(ScriptedCarrier::default(), 5, 0).await;
        let fulfillment = ship(&fx, 2).await;

        let canceled = fx.lifecycle.cancel_one(fulfillment.id).await.unwrap();
        let first_at = canceled.canceled_at.unwrap();

        match fx.lifecycle.cancel_one(fulfillment.id).await.unwrap_err() {
            FulfillmentError::AlreadyCanceled { id, canceled_at } => {
                assert_eq!(id, fulfillment.id);
                assert_eq!(canceled_at, first_at);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_fulfillment() {
        let fx = fixture(ScriptedCarrier::default(), 5, 0).await;
        let err = fx.lifecycle.cancel_one(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_all_only_touches_active() {
        let fx = fixture(ScriptedCarrier::default(), 10, 0).await;
        let first = ship(&fx, 2).await;
        ship(&fx, 3).await;
        ship(&fx, 1).await;
        fx.lifecycle.cancel_one(first.id).await.unwrap();

        let outcome = fx.lifecycle.cancel_all(fx.order_id).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.succeeded.len(), 2);
        assert!(outcome.succeeded.iter().all(|f| f.id != first.id));

        let history = fx.lifecycle.history(fx.order_id).await.unwrap();
        assert!(history.active.is_empty());
        assert_eq!(history.canceled.len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_all_with_nothing_active() {
        let fx = fixture(ScriptedCarrier::default(), 10, 0).await;
        let outcome = fx.lifecycle.cancel_all(fx.order_id).await.unwrap();
        assert!(outcome.succeeded.is_empty());
        assert!(outcome.failed.is_empty());
    }

    #[tokio::test]
    async fn test_history_partitions_and_reports_progress() {
        let fx = fixture(ScriptedCarrier::default(), 10, 0).await;
        let kept = ship(&fx, 4).await;
        let dropped = ship(&fx, 3).await;
        fx.lifecycle.cancel_one(dropped.id).await.unwrap();

        let history = fx.lifecycle.history(fx.order_id).await.unwrap();
        assert_eq!(history.active.len(), 1);
        assert_eq!(history.active[0].id, kept.id);
        assert_eq!(history.canceled[0].id, dropped.id);
        assert_eq!(history.line_items[0].fulfilled, 4);
        assert_eq!(history.line_items[0].remaining, 6);
    }
}
