use std::sync::Arc;
use std::time::Duration;
use shipdesk_carrier::{BuiltInRegistry, CarrierGateway, CarrierSettings, HttpEndpointClient};
use shipdesk_core::repository::{NotificationSink, OrderRepository, ProviderRepository};
use shipdesk_fulfillment::{FulfillmentLifecycle, FulfillmentService, LabelOrchestrator, RateAggregator};
use shipdesk_store::app_config::{CarrierConfig, RatesConfig};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FulfillmentService>,
    pub requote_debounce: Duration,
}

impl AppState {
    /// Wire the fulfillment stack over the given stores and sink
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        providers: Arc<dyn ProviderRepository>,
        sink: Arc<dyn NotificationSink>,
        registry: BuiltInRegistry,
        carrier: &CarrierConfig,
        rates: &RatesConfig,
    ) -> anyhow::Result<Self> {
        let gateway = Arc::new(CarrierGateway::new(
            registry,
            HttpEndpointClient::new(&carrier.user_agent)?,
            CarrierSettings {
                quote_timeout: Duration::from_millis(carrier.quote_timeout_ms),
                label_timeout: Duration::from_millis(carrier.label_timeout_ms),
                circuit_failure_threshold: carrier.circuit_failure_threshold,
                circuit_reset: Duration::from_secs(carrier.circuit_reset_seconds),
            },
        ));

        let aggregator = Arc::new(RateAggregator::new(
            orders.clone(),
            providers.clone(),
            gateway.clone(),
            carrier.quote_retries,
        ));
        let orchestrator = Arc::new(LabelOrchestrator::new(orders.clone(), providers.clone(), gateway.clone()));
        let lifecycle = Arc::new(FulfillmentLifecycle::new(orders.clone()));

        let service = Arc::new(FulfillmentService::new(
            orders,
            providers,
            gateway,
            aggregator,
            orchestrator,
            lifecycle,
            sink,
        ));

        Ok(Self {
            service,
            requote_debounce: Duration::from_millis(rates.debounce_ms),
        })
    }
}
