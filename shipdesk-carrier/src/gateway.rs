use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use shipdesk_core::models::{Address, Order, ShippingLabel, TrackingStatus, ValidatedAddress};
use shipdesk_core::shipping::{AdapterEndpoint, LineItemSelection, PackageDescriptor, ProviderOperation, Rate, ShippingProvider};
use shipdesk_core::{CarrierAdapter, ProviderError, ProviderFailure};

use crate::builtin::BuiltInRegistry;
use crate::circuit::CircuitBreaker;
use crate::http::HttpEndpointClient;
use crate::wire;

#[derive(Debug, Clone)]
pub struct CarrierSettings {
    pub quote_timeout: Duration,
    pub label_timeout: Duration,
    pub circuit_failure_threshold: usize,
    pub circuit_reset: Duration,
}

impl Default for CarrierSettings {
    fn default() -> Self {
        Self {
            quote_timeout: Duration::from_secs(15),
            label_timeout: Duration::from_secs(30),
            circuit_failure_threshold: 5,
            circuit_reset: Duration::from_secs(30),
        }
    }
}

/// Entry point to every carrier integration: owns the built-in registry,
/// the HTTP client for custom endpoints, and one circuit breaker per provider.
pub struct CarrierGateway {
    registry: BuiltInRegistry,
    http: HttpEndpointClient,
    settings: CarrierSettings,
    breakers: Mutex<HashMap<Uuid, Arc<CircuitBreaker>>>,
}

impl CarrierGateway {
    pub fn new(registry: BuiltInRegistry, http: HttpEndpointClient, settings: CarrierSettings) -> Self {
        Self {
            registry,
            http,
            settings,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CarrierSettings {
        &self.settings
    }

    fn breaker_for(&self, provider: &ShippingProvider) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(provider.id)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    &provider.name,
                    self.settings.circuit_failure_threshold,
                    self.settings.circuit_reset,
                ))
            })
            .clone()
    }

    /// Adapter bound to one provider's configuration
    pub fn adapter_for(&self, provider: &ShippingProvider) -> ProviderAdapter<'_> {
        ProviderAdapter {
            gateway: self,
            provider: provider.clone(),
            breaker: self.breaker_for(provider),
        }
    }
}

enum Target<'a> {
    BuiltIn(Arc<dyn CarrierAdapter>),
    Custom(&'a str),
}

/// One provider's five operations, dispatched per operation to either a
/// built-in adapter or a custom HTTP endpoint. Callers never branch on which.
pub struct ProviderAdapter<'g> {
    gateway: &'g CarrierGateway,
    provider: ShippingProvider,
    breaker: Arc<CircuitBreaker>,
}

impl<'g> ProviderAdapter<'g> {
    pub fn provider(&self) -> &ShippingProvider {
        &self.provider
    }

    fn failure(&self, operation: ProviderOperation, error: ProviderError) -> ProviderFailure {
        ProviderFailure {
            provider_id: self.provider.id,
            provider: self.provider.name.clone(),
            operation,
            error,
        }
    }

    fn target(&self, operation: ProviderOperation) -> Result<Target<'_>, ProviderError> {
        match self.provider.endpoints.for_operation(operation) {
            AdapterEndpoint::BuiltIn { key } => self.gateway.registry.get(key).map(Target::BuiltIn),
            AdapterEndpoint::CustomEndpoint { url } => Ok(Target::Custom(url.as_str())),
        }
    }

    /// Breaker check, timeout, and error attribution around one call
    async fn guarded<T, F>(
        &self,
        operation: ProviderOperation,
        timeout: Duration,
        call: F,
    ) -> Result<T, ProviderFailure>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if !self.breaker.check().await {
            tracing::warn!("{} {} skipped: circuit open", self.provider.name, operation);
            return Err(self.failure(operation, ProviderError::CircuitOpen));
        }

        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ProviderError::Timeout(_))) | Err(_) => {
                Err(ProviderError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(e)) => Err(e),
        };

        match outcome {
            Ok(value) => {
                self.breaker.record_success().await;
                Ok(value)
            }
            Err(error) => {
                // A carrier saying "no" is a healthy carrier
                if matches!(error, ProviderError::Rejected(_)) {
                    self.breaker.release_trial().await;
                } else {
                    self.breaker.record_failure().await;
                }
                tracing::warn!("{} {} failed: {}", self.provider.name, operation, error);
                Err(self.failure(operation, error))
            }
        }
    }

    pub async fn quote_rates(
        &self,
        order: &Order,
        package: &PackageDescriptor,
        timeout: Duration,
    ) -> Result<Vec<Rate>, ProviderFailure> {
        let op = ProviderOperation::QuoteRates;
        let target = self.target(op).map_err(|e| self.failure(op, e))?;
        let mut rates = self
            .guarded(op, timeout, async {
                match target {
                    Target::BuiltIn(adapter) => adapter.quote_rates(order, package).await,
                    Target::Custom(url) => {
                        let request = wire::QuoteRequest { order: order.into(), package: *package };
                        self.gateway
                            .http
                            .post::<_, wire::QuoteResponse>(url, &request)
                            .await?
                            .into_rates()
                    }
                }
            })
            .await?;

        for rate in &mut rates {
            rate.provider_id = self.provider.id;
        }
        Ok(rates)
    }

    pub async fn create_label(
        &self,
        order: &Order,
        rate_id: &str,
        package: &PackageDescriptor,
        selections: &[LineItemSelection],
        timeout: Duration,
    ) -> Result<ShippingLabel, ProviderFailure> {
        let op = ProviderOperation::CreateLabel;
        let target = self.target(op).map_err(|e| self.failure(op, e))?;
        self.guarded(op, timeout, async {
            match target {
                Target::BuiltIn(adapter) => adapter.create_label(order, rate_id, package, selections).await,
                Target::Custom(url) => {
                    let request = wire::LabelRequest {
                        order: order.into(),
                        rate_id: rate_id.to_string(),
                        package: *package,
                        selections: selections.to_vec(),
                    };
                    self.gateway
                        .http
                        .post::<_, wire::LabelResponse>(url, &request)
                        .await?
                        .into_label()
                }
            }
        })
        .await
    }

    pub async fn validate_address(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<ValidatedAddress, ProviderFailure> {
        let op = ProviderOperation::ValidateAddress;
        let target = self.target(op).map_err(|e| self.failure(op, e))?;
        self.guarded(op, timeout, async {
            match target {
                Target::BuiltIn(adapter) => adapter.validate_address(address).await,
                Target::Custom(url) => {
                    let request = wire::AddressRequest { address: address.clone() };
                    self.gateway.http.post(url, &request).await
                }
            }
        })
        .await
    }

    pub async fn track_shipment(
        &self,
        tracking_number: &str,
        timeout: Duration,
    ) -> Result<TrackingStatus, ProviderFailure> {
        let op = ProviderOperation::TrackShipment;
        let target = self.target(op).map_err(|e| self.failure(op, e))?;
        self.guarded(op, timeout, async {
            match target {
                Target::BuiltIn(adapter) => adapter.track_shipment(tracking_number).await,
                Target::Custom(url) => {
                    let request = wire::TrackRequest { tracking_number: tracking_number.to_string() };
                    self.gateway.http.post(url, &request).await
                }
            }
        })
        .await
    }

    pub async fn cancel_label(
        &self,
        label_reference: &str,
        timeout: Duration,
    ) -> Result<(), ProviderFailure> {
        let op = ProviderOperation::CancelLabel;
        let target = self.target(op).map_err(|e| self.failure(op, e))?;
        self.guarded(op, timeout, async {
            match target {
                Target::BuiltIn(adapter) => adapter.cancel_label(label_reference).await,
                Target::Custom(url) => {
                    let request = wire::CancelRequest { label_reference: label_reference.to_string() };
                    let response: wire::CancelResponse = self.gateway.http.post(url, &request).await?;
                    if response.ok {
                        Ok(())
                    } else {
                        Err(ProviderError::Rejected(
                            response.message.unwrap_or_else(|| "label cancellation refused".to_string()),
                        ))
                    }
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{routing::post, Json, Router};
    use shipdesk_core::shipping::{DimensionUnit, ProviderEndpoints, WeightUnit};

    /// Never answers within any reasonable timeout
    struct StalledCarrier;

    #[async_trait]
    impl CarrierAdapter for StalledCarrier {
        async fn quote_rates(&self, _: &Order, _: &PackageDescriptor) -> Result<Vec<Rate>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
        async fn create_label(&self, _: &Order, _: &str, _: &PackageDescriptor, _: &[LineItemSelection]) -> Result<ShippingLabel, ProviderError> {
            Err(ProviderError::Unsupported)
        }
        async fn validate_address(&self, _: &Address) -> Result<ValidatedAddress, ProviderError> {
            Err(ProviderError::Unsupported)
        }
        async fn track_shipment(&self, _: &str) -> Result<TrackingStatus, ProviderError> {
            Err(ProviderError::Unsupported)
        }
        async fn cancel_label(&self, _: &str) -> Result<(), ProviderError> {
            Err(ProviderError::Unsupported)
        }
    }

    fn package() -> PackageDescriptor {
        PackageDescriptor {
            length: 10.0,
            width: 10.0,
            height: 10.0,
            dimension_unit: DimensionUnit::Cm,
            weight: 1.0,
            weight_unit: WeightUnit::Kg,
        }
    }

    fn gateway(registry: BuiltInRegistry, threshold: usize) -> CarrierGateway {
        CarrierGateway::new(
            registry,
            HttpEndpointClient::new("shipdesk-test").unwrap(),
            CarrierSettings {
                circuit_failure_threshold: threshold,
                ..CarrierSettings::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_provider_error_and_trips_breaker() {
        let mut registry = BuiltInRegistry::new();
        registry.register("stalled", Arc::new(StalledCarrier));
        let gateway = gateway(registry, 1);
        let provider = ShippingProvider::new("Stalled Co", ProviderEndpoints::all_built_in("stalled"));
        let order = Order::new("#1", vec![]);

        let adapter = gateway.adapter_for(&provider);
        let failure = adapter
            .quote_rates(&order, &package(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(failure.error, ProviderError::Timeout(250));
        assert_eq!(failure.provider, "Stalled Co");

        let failure = adapter
            .quote_rates(&order, &package(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(failure.error, ProviderError::CircuitOpen);
    }

    #[tokio::test]
    async fn test_mixed_endpoints_dispatch_per_operation() {
        let router = Router::new().route(
            "/quote",
            post(|Json(req): Json<wire::QuoteRequest>| async move {
                Json(serde_json::json!({
                    "rates": [{
                        "id": format!("hook-{}", req.order.display_number),
                        "carrier": "Hook Freight",
                        "service": "Pallet",
                        "price_minor": 4200,
                        "currency": "USD",
                        "estimated_days": 6
                    }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let mut endpoints = ProviderEndpoints::all_built_in("flat_rate");
        endpoints.rate_quote = AdapterEndpoint::custom(format!("http://{}/quote", addr));
        let provider = ShippingProvider::new("Hybrid", endpoints);
        let gateway = gateway(BuiltInRegistry::with_defaults(), 5);
        let adapter = gateway.adapter_for(&provider);
        let order = Order::new("#77", vec![]);

        let rates = adapter.quote_rates(&order, &package(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].id, "hook-#77");
        assert_eq!(rates[0].provider_id, provider.id);

        let tracked = adapter.track_shipment("FRABC123", Duration::from_secs(5)).await.unwrap();
        assert_eq!(tracked.status, "PRE_TRANSIT");
    }

    #[tokio::test]
    async fn test_unknown_built_in_is_attributed() {
        let gateway = gateway(BuiltInRegistry::new(), 5);
        let provider = ShippingProvider::new("Ghost", ProviderEndpoints::all_built_in("ghost"));
        let failure = gateway
            .adapter_for(&provider)
            .cancel_label("FR1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(failure.operation, ProviderOperation::CancelLabel);
        assert_eq!(failure.error, ProviderError::UnknownBuiltIn("ghost".to_string()));
    }
}
