use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use shipdesk_carrier::CarrierGateway;
use shipdesk_core::models::{Address, TrackingStatus, ValidatedAddress};
use shipdesk_core::repository::{NotificationSink, OrderRepository, ProviderRepository};
use shipdesk_core::shipping::AdapterEndpoint;
use shipdesk_core::{Fulfillment, PackageDescriptor, Rate, ShippingProvider};
use shipdesk_shared::models::events::{
    FulfilledQuantity, FulfillmentCanceledEvent, FulfillmentCreatedEvent, FulfillmentEvent,
};

use crate::error::{FulfillmentError, FulfillmentResult, ValidationError};
use crate::lifecycle::{CancelAllOutcome, FulfillmentHistory, FulfillmentLifecycle};
use crate::orchestrator::{CreateFulfillmentRequest, LabelOrchestrator};
use crate::rates::{RateAggregator, RateBoard};
use crate::requote::RequoteSession;
use crate::session::ShipmentSession;

/// Releases an order's submission slot when the create call finishes
struct SubmissionGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    order_id: Uuid,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.order_id);
    }
}

/// Unlocks a session whose submit future is dropped before it settles
struct SessionSubmit<'a> {
    session: &'a mut ShipmentSession,
}

impl Drop for SessionSubmit<'_> {
    fn drop(&mut self) {
        self.session.abort_submit();
    }
}

/// The operations exposed to callers: create, cancel, quote, and provider
/// administration. Notifications are published after the fact and never
/// affect the outcome of the operation that triggered them.
pub struct FulfillmentService {
    orders: Arc<dyn OrderRepository>,
    providers: Arc<dyn ProviderRepository>,
    gateway: Arc<CarrierGateway>,
    aggregator: Arc<RateAggregator>,
    orchestrator: Arc<LabelOrchestrator>,
    lifecycle: Arc<FulfillmentLifecycle>,
    sink: Arc<dyn NotificationSink>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl FulfillmentService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        providers: Arc<dyn ProviderRepository>,
        gateway: Arc<CarrierGateway>,
        aggregator: Arc<RateAggregator>,
        orchestrator: Arc<LabelOrchestrator>,
        lifecycle: Arc<FulfillmentLifecycle>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            orders,
            providers,
            gateway,
            aggregator,
            orchestrator,
            lifecycle,
            sink,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, order_id: Uuid) -> Result<SubmissionGuard<'_>, ValidationError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(order_id) {
            return Err(ValidationError::SubmissionInFlight);
        }
        Ok(SubmissionGuard { in_flight: &self.in_flight, order_id })
    }

    fn notify(&self, event: FulfillmentEvent) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.publish(&event).await {
                tracing::warn!("Failed to publish {} for order {}: {}", event.topic(), event.order_id(), e);
            }
        });
    }

    pub async fn create_fulfillment(&self, request: CreateFulfillmentRequest) -> FulfillmentResult<Fulfillment> {
        let _guard = self.claim(request.order_id)?;
        let fulfillment = self.orchestrator.create_shipment(&request).await?;

        if !request.no_notification {
            let label = fulfillment.labels.first();
            self.notify(FulfillmentEvent::Created(FulfillmentCreatedEvent {
                fulfillment_id: fulfillment.id,
                order_id: fulfillment.order_id,
                items: fulfillment
                    .items
                    .iter()
                    .map(|item| FulfilledQuantity { line_item_id: item.line_item_id, quantity: item.quantity })
                    .collect(),
                carrier: label.map(|l| l.carrier.clone()),
                tracking_number: label.map(|l| l.tracking_number.clone()),
                timestamp: fulfillment.created_at.timestamp(),
            }));
        }
        Ok(fulfillment)
    }

    fn notify_canceled(&self, fulfillment: &Fulfillment) {
        self.notify(FulfillmentEvent::Canceled(FulfillmentCanceledEvent {
            fulfillment_id: fulfillment.id,
            order_id: fulfillment.order_id,
            canceled_at: fulfillment.canceled_at.map(|at| at.timestamp()).unwrap_or_default(),
        }));
    }

    pub async fn cancel_fulfillment(&self, fulfillment_id: Uuid) -> FulfillmentResult<Fulfillment> {
        let fulfillment = self.lifecycle.cancel_one(fulfillment_id).await?;
        self.notify_canceled(&fulfillment);
        Ok(fulfillment)
    }

    pub async fn cancel_all_active_fulfillments(&self, order_id: Uuid) -> FulfillmentResult<CancelAllOutcome> {
        let outcome = self.lifecycle.cancel_all(order_id).await?;
        for fulfillment in &outcome.succeeded {
            self.notify_canceled(fulfillment);
        }
        Ok(outcome)
    }

    pub async fn quote_rates(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        package: &PackageDescriptor,
    ) -> FulfillmentResult<Vec<Rate>> {
        self.aggregator.quote(provider_id, order_id, package).await
    }

    pub async fn quote_active(&self, order_id: Uuid, package: &PackageDescriptor) -> FulfillmentResult<RateBoard> {
        self.aggregator.quote_active(order_id, package).await
    }

    pub async fn toggle_provider_active(&self, provider_id: Uuid) -> FulfillmentResult<ShippingProvider> {
        let provider = self
            .providers
            .toggle_active(provider_id)
            .await
            .map_err(FulfillmentError::from_store)?;
        tracing::info!(
            "Provider {} is now {}",
            provider.name,
            if provider.is_active { "active" } else { "inactive" }
        );
        Ok(provider)
    }

    pub async fn list_providers(&self) -> FulfillmentResult<Vec<ShippingProvider>> {
        self.providers.list_providers().await.map_err(FulfillmentError::from_store)
    }

    pub async fn get_provider(&self, provider_id: Uuid) -> FulfillmentResult<ShippingProvider> {
        self.providers
            .get_provider(provider_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("provider {}", provider_id)))
    }

    pub async fn upsert_provider(&self, provider: ShippingProvider) -> FulfillmentResult<ShippingProvider> {
        if provider.name.trim().is_empty() {
            return Err(ValidationError::InvalidProvider("name is required".to_string()).into());
        }
        for endpoint in [
            &provider.endpoints.rate_quote,
            &provider.endpoints.label_create,
            &provider.endpoints.address_validate,
            &provider.endpoints.track,
            &provider.endpoints.cancel_label,
        ] {
            match endpoint {
                AdapterEndpoint::CustomEndpoint { url } if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(ValidationError::InvalidProvider(format!("endpoint {} is not an http(s) URL", url)).into());
                }
                AdapterEndpoint::BuiltIn { key } if key.trim().is_empty() => {
                    return Err(ValidationError::InvalidProvider("built-in key is empty".to_string()).into());
                }
                _ => {}
            }
        }
        self.providers.upsert_provider(&provider).await.map_err(FulfillmentError::from_store)
    }

    async fn active_provider(&self, provider_id: Uuid) -> FulfillmentResult<ShippingProvider> {
        let provider = self.get_provider(provider_id).await?;
        if !provider.is_active {
            return Err(ValidationError::ProviderInactive(provider.name).into());
        }
        Ok(provider)
    }

    pub async fn validate_address(&self, provider_id: Uuid, address: &Address) -> FulfillmentResult<ValidatedAddress> {
        let provider = self.active_provider(provider_id).await?;
        let timeout = self.gateway.settings().quote_timeout;
        Ok(self.gateway.adapter_for(&provider).validate_address(address, timeout).await?)
    }

    pub async fn track_shipment(&self, provider_id: Uuid, tracking_number: &str) -> FulfillmentResult<TrackingStatus> {
        let provider = self.active_provider(provider_id).await?;
        let timeout = self.gateway.settings().quote_timeout;
        Ok(self.gateway.adapter_for(&provider).track_shipment(tracking_number, timeout).await?)
    }

    pub async fn history(&self, order_id: Uuid) -> FulfillmentResult<FulfillmentHistory> {
        self.lifecycle.history(order_id).await
    }

    pub async fn open_session(&self, order_id: Uuid, package: PackageDescriptor) -> FulfillmentResult<ShipmentSession> {
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(FulfillmentError::from_store)?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {}", order_id)))?;
        Ok(ShipmentSession::open(&order, package))
    }

    pub fn requote_session(&self, order_id: Uuid, debounce: Duration) -> RequoteSession {
        RequoteSession::spawn(self.aggregator.clone(), order_id, debounce)
    }

    /// Submit a session's shipment and refresh the session from the live order
    pub async fn submit_session(&self, session: &mut ShipmentSession) -> FulfillmentResult<Fulfillment> {
        let request = session.begin_submit()?;
        let submit = SessionSubmit { session };
        let outcome = self.create_fulfillment(request).await;

        let order_id = submit.session.order_id();
        match self.orders.get_order(order_id).await {
            Ok(Some(order)) => submit.session.finish_submit(&outcome, &order),
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not refresh order {} after submit: {}", order_id, e),
        }
        outcome
    }
}
