use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use shipdesk_carrier::{BuiltInRegistry, CarrierGateway, CarrierSettings, HttpEndpointClient};
use shipdesk_core::models::{Address, TrackingStatus, ValidatedAddress};
use shipdesk_core::repository::{NotificationSink, OrderRepository, ProviderRepository};
use shipdesk_core::shipping::{DimensionUnit, ProviderEndpoints, WeightUnit};
use shipdesk_core::{
    CarrierAdapter, Fulfillment, LineItem, LineItemSelection, Order, PackageDescriptor, ProviderError,
    Rate, ShippingLabel, ShippingProvider, StoreError,
};
use shipdesk_shared::models::events::FulfillmentEvent;
use shipdesk_store::InMemoryStore;

use crate::lifecycle::FulfillmentLifecycle;
use crate::orchestrator::LabelOrchestrator;
use crate::rates::RateAggregator;
use crate::service::FulfillmentService;

pub fn package(weight_kg: f64) -> PackageDescriptor {
    PackageDescriptor {
        length: 30.0,
        width: 20.0,
        height: 10.0,
        dimension_unit: DimensionUnit::Cm,
        weight: weight_kg,
        weight_unit: WeightUnit::Kg,
    }
}

#[derive(Default)]
struct Script {
    prices: Vec<i64>,
    always_fail: Option<ProviderError>,
    fail_next: VecDeque<ProviderError>,
    label_error: Option<ProviderError>,
    /// Quote latency per kg of package weight
    delay_per_kg: Option<Duration>,
    label_delay: Option<Duration>,
}

/// Carrier whose answers, failures and latency are set by the test
#[derive(Clone, Default)]
pub struct ScriptedCarrier {
    script: Arc<Mutex<Script>>,
    quote_calls: Arc<AtomicUsize>,
    quotes_completed: Arc<AtomicUsize>,
    label_calls: Arc<AtomicUsize>,
    cancel_calls: Arc<AtomicUsize>,
}

impl ScriptedCarrier {
    pub fn with_prices(prices: &[i64]) -> Self {
        let carrier = Self::default();
        carrier.script.lock().unwrap().prices = prices.to_vec();
        carrier
    }

    pub fn failing(error: ProviderError) -> Self {
        let carrier = Self::default();
        carrier.script.lock().unwrap().always_fail = Some(error);
        carrier
    }

    pub fn fail_next(&self, error: ProviderError) {
        self.script.lock().unwrap().fail_next.push_back(error);
    }

    pub fn fail_labels(&self, error: ProviderError) {
        self.script.lock().unwrap().label_error = Some(error);
    }

    pub fn slow_quotes(&self, per_kg: Duration) {
        self.script.lock().unwrap().delay_per_kg = Some(per_kg);
    }

    pub fn slow_labels(&self, delay: Duration) {
        self.script.lock().unwrap().label_delay = Some(delay);
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    /// Quotes that ran to the end rather than being dropped mid-call
    pub fn quotes_completed(&self) -> usize {
        self.quotes_completed.load(Ordering::SeqCst)
    }

    pub fn label_calls(&self) -> usize {
        self.label_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarrierAdapter for ScriptedCarrier {
    async fn quote_rates(&self, _order: &Order, package: &PackageDescriptor) -> Result<Vec<Rate>, ProviderError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, outcome) = {
            let mut script = self.script.lock().unwrap();
            let delay = script.delay_per_kg.map(|d| d.mul_f64(package.weight));
            let outcome = match (script.fail_next.pop_front(), script.always_fail.clone()) {
                (Some(e), _) | (None, Some(e)) => Err(e),
                (None, None) => Ok(script.prices.clone()),
            };
            (delay, outcome)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.quotes_completed.fetch_add(1, Ordering::SeqCst);

        Ok(outcome?
            .into_iter()
            .enumerate()
            .map(|(i, price)| Rate {
                id: format!("acme-{}-{}", i, price),
                provider_id: Uuid::nil(),
                carrier: "Acme Parcel".to_string(),
                service: format!("{}kg", package.weight),
                price_minor: price,
                currency: "USD".to_string(),
                estimated_days: Some(3),
            })
            .collect())
    }

    async fn create_label(
        &self,
        _order: &Order,
        rate_id: &str,
        _package: &PackageDescriptor,
        _selections: &[LineItemSelection],
    ) -> Result<ShippingLabel, ProviderError> {
        let n = self.label_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let (delay, error) = {
            let script = self.script.lock().unwrap();
            (script.label_delay, script.label_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = error {
            return Err(error);
        }
        let mut label = ShippingLabel::purchased("Acme Parcel", format!("ACME{:04}", n));
        label.service = Some(rate_id.to_string());
        label.tracking_url = Some(format!("https://acme.example/track/ACME{:04}", n));
        label.provider_reference = Some(format!("lbl_{}", n));
        Ok(label)
    }

    async fn validate_address(&self, address: &Address) -> Result<ValidatedAddress, ProviderError> {
        Ok(ValidatedAddress { address: address.clone(), is_valid: true, messages: vec![] })
    }

    async fn track_shipment(&self, tracking_number: &str) -> Result<TrackingStatus, ProviderError> {
        Ok(TrackingStatus {
            tracking_number: tracking_number.to_string(),
            status: "IN_TRANSIT".to_string(),
            events: vec![],
        })
    }

    async fn cancel_label(&self, _label_reference: &str) -> Result<(), ProviderError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Order store whose commits can be made to fail
pub struct FlakyOrders {
    pub inner: Arc<InMemoryStore>,
    pub fail_commits: AtomicBool,
}

#[async_trait]
impl OrderRepository for FlakyOrders {
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        self.inner.get_order(id).await
    }

    async fn get_fulfillment(&self, id: Uuid) -> Result<Option<Fulfillment>, StoreError> {
        self.inner.get_fulfillment(id).await
    }

    async fn commit_fulfillment(&self, fulfillment: &Fulfillment) -> Result<Fulfillment, StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.commit_fulfillment(fulfillment).await
    }

    async fn cancel_fulfillment(&self, id: Uuid, at: DateTime<Utc>) -> Result<Fulfillment, StoreError> {
        self.inner.cancel_fulfillment(id, at).await
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<FulfillmentEvent>>,
    pub broken: AtomicBool,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: &FulfillmentEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err("broker unavailable".into());
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub orders: Arc<FlakyOrders>,
    pub sink: Arc<RecordingSink>,
    pub gateway: Arc<CarrierGateway>,
    pub aggregator: Arc<RateAggregator>,
    pub orchestrator: Arc<LabelOrchestrator>,
    pub lifecycle: Arc<FulfillmentLifecycle>,
    pub service: Arc<FulfillmentService>,
    pub order_id: Uuid,
    pub line_item_id: Uuid,
    pub provider_id: Uuid,
    pub provider_ids: Vec<Uuid>,
}

impl Fixture {
    pub async fn order(&self) -> Order {
        self.store.get_order(self.order_id).await.unwrap().unwrap()
    }

    pub async fn remaining(&self) -> i32 {
        self.order().await.remaining_unfulfilled(&self.line_item_id)
    }

    pub fn fail_commits(&self, fail: bool) {
        self.orders.fail_commits.store(fail, Ordering::SeqCst);
    }
}

/// One order with one line item (`ordered` units, `shipped` already fulfilled)
pub async fn fixture(carrier: ScriptedCarrier, ordered: i32, shipped: i32) -> Fixture {
    fixture_with(vec![("Acme Parcel", carrier)], ordered, shipped).await
}

pub async fn fixture_with(carriers: Vec<(&str, ScriptedCarrier)>, ordered: i32, shipped: i32) -> Fixture {
    let store = Arc::new(InMemoryStore::new());

    let mut order = Order::new("#1001", vec![]);
    let item = LineItem::new(order.id, "Ceramic mug", Some("MUG-01".to_string()), ordered);
    let line_item_id = item.id;
    order.line_items.push(item);
    if shipped > 0 {
        order
            .fulfillments
            .push(Fulfillment::new(order.id, &[LineItemSelection::new(line_item_id, shipped)], vec![]));
    }
    let order_id = order.id;
    store.insert_order(order).await;

    let mut registry = BuiltInRegistry::new();
    let mut provider_ids = Vec::new();
    for (i, (name, carrier)) in carriers.into_iter().enumerate() {
        let key = format!("scripted_{}", i);
        registry.register(&key, Arc::new(carrier));
        let provider = ShippingProvider::new(name, ProviderEndpoints::all_built_in(&key));
        provider_ids.push(provider.id);
        store.upsert_provider(&provider).await.unwrap();
    }

    let gateway = Arc::new(CarrierGateway::new(
        registry,
        HttpEndpointClient::new("shipdesk-test").unwrap(),
        CarrierSettings {
            quote_timeout: Duration::from_secs(10),
            label_timeout: Duration::from_secs(10),
            circuit_failure_threshold: 100,
            circuit_reset: Duration::from_secs(30),
        },
    ));

    let orders = Arc::new(FlakyOrders { inner: store.clone(), fail_commits: AtomicBool::new(false) });
    let sink = Arc::new(RecordingSink::default());
    let aggregator = Arc::new(RateAggregator::new(orders.clone(), store.clone(), gateway.clone(), 1));
    let orchestrator = Arc::new(LabelOrchestrator::new(orders.clone(), store.clone(), gateway.clone()));
    let lifecycle = Arc::new(FulfillmentLifecycle::new(orders.clone()));
    let service = Arc::new(FulfillmentService::new(
        orders.clone(),
        store.clone(),
        gateway.clone(),
        aggregator.clone(),
        orchestrator.clone(),
        lifecycle.clone(),
        sink.clone(),
    ));

    Fixture {
        store,
        orders,
        sink,
        gateway,
        aggregator,
        orchestrator,
        lifecycle,
        service,
        order_id,
        line_item_id,
        provider_id: provider_ids[0],
        provider_ids,
    }
}
