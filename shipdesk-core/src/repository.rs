use async_trait::async_trait;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shipdesk_shared::models::events::FulfillmentEvent;

use crate::error::StoreError;
use crate::models::{Fulfillment, Order};
use crate::shipping::ShippingProvider;

/// Authoritative order and fulfillment storage
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Live snapshot of an order with all of its fulfillments
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn get_fulfillment(&self, id: Uuid) -> Result<Option<Fulfillment>, StoreError>;

    /// Persist a fulfillment with its items and labels in one unit.
    ///
    /// Implementations must re-derive remaining quantities from stored
    /// fulfillment items inside the same atomic unit and refuse with
    /// `StoreError::QuantityExceeded` instead of overshooting.
    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<Fulfillment, StoreError>;

    /// Set `canceled_at` if the fulfillment is still active.
    /// Returns `StoreError::AlreadyCanceled` carrying the original timestamp otherwise.
    async fn cancel_fulfillment(&self, id: Uuid, at: DateTime<Utc>) -> Result<Fulfillment, StoreError>;
}

/// Carrier integration configuration store
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn list_providers(&self) -> Result<Vec<ShippingProvider>, StoreError>;

    async fn get_provider(&self, id: Uuid) -> Result<Option<ShippingProvider>, StoreError>;

    async fn upsert_provider(&self, provider: &ShippingProvider) -> Result<ShippingProvider, StoreError>;

    /// Flip `is_active` atomically and return the updated record
    async fn toggle_active(&self, id: Uuid) -> Result<ShippingProvider, StoreError>;

    async fn list_active_providers(&self) -> Result<Vec<ShippingProvider>, StoreError> {
        Ok(self
            .list_providers()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .collect())
    }
}

/// Fire-and-forget audit/notification sink
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(
        &self,
        event: &FulfillmentEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
