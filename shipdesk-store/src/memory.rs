use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use shipdesk_core::repository::{OrderRepository, ProviderRepository};
use shipdesk_core::{Fulfillment, Order, ShippingProvider, StoreError};

/// Process-local store. Each write happens under one lock, so a commit's
/// re-validation and insert are a single atomic step.
#[derive(Default)]
pub struct InMemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    providers: RwLock<HashMap<Uuid, ShippingProvider>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order; the order read API itself is owned elsewhere
    pub async fn insert_order(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_fulfillment(&self, id: Uuid) -> Result<Option<Fulfillment>, StoreError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .flat_map(|o| o.fulfillments.iter())
            .find(|f| f.id == id)
            .cloned())
    }

    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<Fulfillment, StoreError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&fulfillment.order_id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", fulfillment.order_id)))?;

        let requested: Vec<_> = fulfillment
            .items
            .iter()
            .map(|item| shipdesk_core::LineItemSelection::new(item.line_item_id, item.quantity))
            .collect();
        order.check_selections(&requested).map_err(StoreError::QuantityExceeded)?;

        order.fulfillments.push(fulfillment.clone());
        tracing::debug!("Committed fulfillment {} to order {}", fulfillment.id, order.display_number);
        Ok(fulfillment.clone())
    }

    async fn cancel_fulfillment(&self, id: Uuid, at: DateTime<Utc>) -> Result<Fulfillment, StoreError> {
        let mut orders = self.orders.write().await;
        let fulfillment = orders
            .values_mut()
            .flat_map(|o| o.fulfillments.iter_mut())
            .find(|f| f.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("fulfillment {}", id)))?;

        if let Some(canceled_at) = fulfillment.canceled_at {
            return Err(StoreError::AlreadyCanceled(canceled_at));
        }
        fulfillment.canceled_at = Some(at);
        Ok(fulfillment.clone())
    }
}

#[async_trait]
impl ProviderRepository for InMemoryStore {
    async fn list_providers(&self) -> Result<Vec<ShippingProvider>, StoreError> {
        let mut providers: Vec<ShippingProvider> = self.providers.read().await.values().cloned().collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    async fn get_provider(&self, id: Uuid) -> Result<Option<ShippingProvider>, StoreError> {
        Ok(self.providers.read().await.get(&id).cloned())
    }

    async fn upsert_provider(&self, provider: &ShippingProvider) -> Result<ShippingProvider, StoreError> {
        let mut stored = provider.clone();
        stored.updated_at = Utc::now();
        self.providers.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn toggle_active(&self, id: Uuid) -> Result<ShippingProvider, StoreError> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("provider {}", id)))?;
        provider.toggle_active();
        Ok(provider.clone())
    }
}
