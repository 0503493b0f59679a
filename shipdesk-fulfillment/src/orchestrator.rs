use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use shipdesk_carrier::CarrierGateway;
use shipdesk_core::repository::{OrderRepository, ProviderRepository};
use shipdesk_core::{Fulfillment, LineItemSelection, Order, PackageDescriptor, Rate, ShippingLabel, ShippingProvider, StoreError};

use crate::error::{FulfillmentError, FulfillmentResult, ValidationError};

/// Carrier and tracking typed in by the operator instead of buying a label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualTracking {
    pub carrier: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFulfillmentRequest {
    pub order_id: Uuid,
    pub selections: Vec<LineItemSelection>,
    pub rate: Option<Rate>,
    pub manual_tracking: Option<ManualTracking>,
    pub package: PackageDescriptor,
    #[serde(default)]
    pub no_notification: bool,
}

impl CreateFulfillmentRequest {
    /// Checks that need no store or carrier access
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(negative) = self.selections.iter().find(|s| s.quantity < 0) {
            return Err(ValidationError::NegativeQuantity(negative.line_item_id));
        }
        if !self.selections.iter().any(|s| s.quantity > 0) {
            return Err(ValidationError::NothingToShip);
        }
        match (&self.rate, &self.manual_tracking) {
            (None, None) => Err(ValidationError::NoRateSelected),
            (Some(_), Some(_)) => Err(ValidationError::ConflictingShippingMethod),
            (Some(_), None) if !self.package.is_valid() => Err(ValidationError::InvalidPackage),
            (None, Some(manual)) if manual.carrier.trim().is_empty() || manual.tracking_number.trim().is_empty() => {
                Err(ValidationError::EmptyManualTracking)
            }
            _ => Ok(()),
        }
    }

    /// Selections with zero quantities dropped
    pub fn shipped(&self) -> Vec<LineItemSelection> {
        self.selections.iter().filter(|s| s.quantity > 0).copied().collect()
    }
}

/// Turns a selected rate plus planner quantities into one persisted fulfillment.
///
/// All-or-nothing: a failure at any step leaves no fulfillment, item, or label
/// behind. A label already bought from the carrier is voided on a best-effort
/// basis when the commit fails.
pub struct LabelOrchestrator {
    orders: Arc<dyn OrderRepository>,
    providers: Arc<dyn ProviderRepository>,
    gateway: Arc<CarrierGateway>,
}

impl LabelOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        providers: Arc<dyn ProviderRepository>,
        gateway: Arc<CarrierGateway>,
    ) -> Self {
        Self { orders, providers, gateway }
    }

    pub async fn create_shipment(&self, request: &CreateFulfillmentRequest) -> FulfillmentResult<Fulfillment> {
        request.validate()?;
        let selections = request.shipped();

        // 1. Re-validate against the live order, not the planning snapshot
        let order = self.live_order(request.order_id).await?;
        if let Some(unknown) = selections.iter().find(|s| order.line_item(&s.line_item_id).is_none()) {
            return Err(ValidationError::UnknownLineItem(unknown.line_item_id).into());
        }
        order
            .check_selections(&selections)
            .map_err(ValidationError::QuantityExceeded)?;

        // 2. Buy a label, or take the operator's tracking details as-is
        let (label, provider) = match (&request.rate, &request.manual_tracking) {
            (Some(rate), _) => {
                let (label, provider) = self.purchase_label(&order, rate, request, &selections).await?;
                (label, Some(provider))
            }
            (None, Some(manual)) => (
                ShippingLabel::manual(
                    manual.carrier.trim(),
                    manual.tracking_number.trim(),
                    manual.tracking_url.clone(),
                ),
                None,
            ),
            (None, None) => return Err(ValidationError::NoRateSelected.into()),
        };

        // 3. Persist everything in one unit
        let fulfillment = Fulfillment::new(order.id, &selections, vec![label]);
        match self.orders.commit_fulfillment(&fulfillment).await {
            Ok(committed) => {
                tracing::info!(
                    "Created fulfillment {} on order {} ({} unit(s))",
                    committed.id,
                    order.display_number,
                    committed.total_quantity()
                );
                Ok(committed)
            }
            Err(err) => {
                if let Some(provider) = provider {
                    self.void_labels(&provider, &fulfillment.labels).await;
                }
                Err(match err {
                    StoreError::QuantityExceeded(shortfalls) => ValidationError::QuantityExceeded(shortfalls).into(),
                    StoreError::NotFound(what) => FulfillmentError::NotFound(what),
                    other => {
                        tracing::error!("Fulfillment commit failed for order {}: {}", order.display_number, other);
                        FulfillmentError::Persistence(other.to_string())
                    }
                })
            }
        }
    }

    async fn live_order(&self, order_id: Uuid) -> FulfillmentResult<Order> {
        self.orders
            .get_order(order_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order_id)))
    }

    async fn purchase_label(
        &self,
        order: &Order,
        rate: &Rate,
        request: &CreateFulfillmentRequest,
        selections: &[LineItemSelection],
    ) -> FulfillmentResult<(ShippingLabel, ShippingProvider)> {
        let provider = self
            .providers
            .get_provider(rate.provider_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("provider {}", rate.provider_id)))?;
        if !provider.is_active {
            return Err(ValidationError::ProviderInactive(provider.name).into());
        }

        let timeout = self.gateway.settings().label_timeout;
        let mut label = self
            .gateway
            .adapter_for(&provider)
            .create_label(order, &rate.id, &request.package, selections, timeout)
            .await?;

        if label.service.is_none() {
            label.service = Some(rate.service.clone());
        }
        if !label.metadata.is_object() {
            label.metadata = serde_json::json!({});
        }
        if let Some(meta) = label.metadata.as_object_mut() {
            meta.insert("package".to_string(), serde_json::json!(request.package));
            meta.insert(
                "rate".to_string(),
                serde_json::json!({
                    "id": rate.id,
                    "price_minor": rate.price_minor,
                    "currency": rate.currency,
                }),
            );
        }
        Ok((label, provider))
    }

    async fn void_labels(&self, provider: &ShippingProvider, labels: &[ShippingLabel]) {
        let adapter = self.gateway.adapter_for(provider);
        let timeout = self.gateway.settings().label_timeout;
        for label in labels {
            match adapter.cancel_label(label.void_reference(), timeout).await {
                Ok(()) => tracing::info!("Voided label {} after failed commit", label.tracking_number),
                Err(failure) => tracing::error!(
                    "Could not void label {} after failed commit: {}",
                    label.tracking_number,
                    failure
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, package, ScriptedCarrier};
    use shipdesk_core::models::LabelStatus;
    use shipdesk_core::ProviderError;

    async fn cheapest_rate(fx: &crate::testing::Fixture) -> Rate {
        fx.aggregator
            .quote(fx.provider_id, fx.order_id, &package(1.0))
            .await
            .unwrap()
            .remove(0)
    }

    fn request(fx: &crate::testing::Fixture, qty: i32, rate: Option<Rate>) -> CreateFulfillmentRequest {
        CreateFulfillmentRequest {
            order_id: fx.order_id,
            selections: vec![LineItemSelection::new(fx.line_item_id, qty)],
            rate,
            manual_tracking: None,
            package: package(1.0),
            no_notification: false,
        }
    }

    #[tokio::test]
    async fn test_partial_shipment_with_carrier_label() {
        let carrier = ScriptedCarrier::with_prices(&[1250, 999, 1500]);
        let fx = fixture(carrier.clone(), 10, 3).await;
        let rate = cheapest_rate(&fx).await;
        assert_eq!(rate.price_minor, 999);

        let fulfillment = fx.orchestrator.create_shipment(&request(&fx, 5, Some(rate))).await.unwrap();

        assert_eq!(fulfillment.items.len(), 1);
        assert_eq!(fulfillment.items[0].quantity, 5);
        assert_eq!(fulfillment.labels.len(), 1);
        assert_eq!(fulfillment.labels[0].carrier, "Acme Parcel");
        assert_eq!(fulfillment.labels[0].tracking_number, "ACME0001");
        assert_eq!(fulfillment.labels[0].metadata["rate"]["price_minor"], 999);
        assert_eq!(fx.remaining().await, 2);
    }

    #[tokio::test]
    async fn test_manual_tracking_skips_carrier() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 4, 0).await;
        let mut req = request(&fx, 4, None);
        req.manual_tracking = Some(ManualTracking {
            carrier: "Local Courier".to_string(),
            tracking_number: " LC-123 ".to_string(),
            tracking_url: None,
        });

        let fulfillment = fx.orchestrator.create_shipment(&req).await.unwrap();
        assert_eq!(fulfillment.labels[0].status, LabelStatus::Manual);
        assert_eq!(fulfillment.labels[0].tracking_number, "LC-123");
        assert_eq!(carrier.label_calls(), 0);
        assert_eq!(fx.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_second_of_two_sessions_is_revalidated() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 10, 0).await;
        let rate = cheapest_rate(&fx).await;

        // Both sessions planned 6 against 10 remaining
        fx.orchestrator.create_shipment(&request(&fx, 6, Some(rate.clone()))).await.unwrap();
        let err = fx.orchestrator.create_shipment(&request(&fx, 6, Some(rate))).await.unwrap_err();

        match err {
            FulfillmentError::Validation(ValidationError::QuantityExceeded(shortfalls)) => {
                assert_eq!(shortfalls[0].requested, 6);
                assert_eq!(shortfalls[0].remaining, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(carrier.label_calls(), 1);
        assert_eq!(fx.remaining().await, 4);
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_overshoot() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        carrier.slow_labels(std::time::Duration::from_millis(20));
        let fx = fixture(carrier.clone(), 10, 0).await;
        let rate = cheapest_rate(&fx).await;

        let a = request(&fx, 6, Some(rate.clone()));
        let b = request(&fx, 6, Some(rate));
        let (ra, rb) = tokio::join!(fx.orchestrator.create_shipment(&a), fx.orchestrator.create_shipment(&b));

        assert_eq!([ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let failed = if ra.is_err() { ra.unwrap_err() } else { rb.unwrap_err() };
        assert!(failed.is_validation());
        assert_eq!(fx.remaining().await, 4);
        // Both bought labels; the loser's label is voided
        assert_eq!(carrier.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_carrier_failure_persists_nothing() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 10, 0).await;
        let rate = cheapest_rate(&fx).await;
        carrier.fail_labels(ProviderError::Status { status: 503, body: "maintenance".to_string() });

        let err = fx.orchestrator.create_shipment(&request(&fx, 2, Some(rate))).await.unwrap_err();
        match err {
            FulfillmentError::Provider(failure) => assert_eq!(failure.provider, "Acme Parcel"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fx.order().await.fulfillments.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_voids_label_and_persists_nothing() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 10, 0).await;
        let rate = cheapest_rate(&fx).await;
        fx.fail_commits(true);

        let err = fx.orchestrator.create_shipment(&request(&fx, 2, Some(rate))).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Persistence(_)));
        assert_eq!(carrier.cancel_calls(), 1);
        assert!(fx.order().await.fulfillments.is_empty());
        assert_eq!(fx.remaining().await, 10);
    }

    #[tokio::test]
    async fn test_local_preconditions() {
        let carrier = ScriptedCarrier::with_prices(&[999]);
        let fx = fixture(carrier.clone(), 10, 0).await;

        let err = fx.orchestrator.create_shipment(&request(&fx, 2, None)).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(ValidationError::NoRateSelected)));

        let rate = cheapest_rate(&fx).await;
        let err = fx.orchestrator.create_shipment(&request(&fx, 0, Some(rate.clone()))).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(ValidationError::NothingToShip)));

        let mut req = request(&fx, 1, Some(rate));
        req.selections.push(LineItemSelection::new(Uuid::new_v4(), 1));
        let err = fx.orchestrator.create_shipment(&req).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Validation(ValidationError::UnknownLineItem(_))));

        assert_eq!(carrier.label_calls(), 0);
    }
}
